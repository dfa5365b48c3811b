use crate::session::TransportError;

/// Q.931 release causes reported to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Q931Cause {
    Unallocated = 1,
    NoRouteToDestination = 3,
    ChannelUnacceptable = 6,
    NormalClearing = 16,
    UserBusy = 17,
    NoUserResponse = 18,
    NormalUnspecified = 31,
    ServiceOptionUnavailable = 63,
}

impl Q931Cause {
    pub fn code(self) -> u8 {
        self as u8
    }
}

const SIP_OK: u16 = 200;

/// Map the SIP status reported by the signaling layer, or the transport
/// failure that ended the session, to a Q.931 release cause.
pub fn map_disconnect_cause(sip_cause: &str, error: Option<&TransportError>) -> Q931Cause {
    let code = sip_cause.trim().parse::<u16>().unwrap_or(0);
    if sip_cause.is_empty() || code == SIP_OK {
        return match error {
            None => Q931Cause::NormalClearing,
            Some(TransportError::BadStatus(status)) => match *status {
                404 => Q931Cause::Unallocated,
                502 => Q931Cause::NoRouteToDestination,
                406 => Q931Cause::ChannelUnacceptable,
                408 => Q931Cause::NoUserResponse,
                503 => Q931Cause::ServiceOptionUnavailable,
                200 => Q931Cause::NormalClearing,
                _ => Q931Cause::NormalUnspecified,
            },
            Some(TransportError::Timeout) => Q931Cause::NoUserResponse,
            Some(_) => Q931Cause::NormalUnspecified,
        };
    }

    match code {
        404 => Q931Cause::Unallocated,
        502 => Q931Cause::NoRouteToDestination,
        406 => Q931Cause::ChannelUnacceptable,
        486 => Q931Cause::UserBusy,
        408 => Q931Cause::NoUserResponse,
        503 => Q931Cause::ServiceOptionUnavailable,
        _ => Q931Cause::NormalUnspecified,
    }
}
