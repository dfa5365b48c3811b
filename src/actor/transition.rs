//! Per-channel transitions. [`plan`] picks what a channel does for an event
//! given its session state; [`execute`] drives the session and the record
//! through it.

use tracing::warn;

use crate::config::Ed137Version;
use crate::crd::{map_disconnect_cause, CallRecord, Operation, Preset, Property, Transition};
use crate::protocol::{
    BriefState, CallState, Direction, EventKind, GroupState, Hold, MediaState, RadioButtonState,
    RecorderKind,
};
use crate::session::{Connector, Session, SessionError, SessionState};
use crate::utils;

/// What one channel does in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    /// Start, announce and record in one go (briefing and group feeds)
    OpenAndRecord,
    /// Start, announce and push metadata; recording waits for a later event
    Open,
    /// Start, announce, push metadata and key up immediately
    OpenAndKeyUp,
    /// Radio key-up / squelch open on an established session
    KeyUp,
    /// Radio key-down / squelch closed while recording
    KeyDown,
    /// Phone call answered
    Confirm,
    /// Phone media put on hold
    Hold(MediaState),
    /// Phone media back from hold
    Resume,
    /// Normal end of the entity
    Close,
}

/// Pick the action for `event` and the forwarding signal it raises, if any.
pub fn plan(kind: RecorderKind, event: EventKind, session: &Session) -> (Action, Option<bool>) {
    let state = session.state();
    let closed = session.is_closed();
    let idle = matches!(state, SessionState::Null | SessionState::Disconnect);

    match event {
        EventKind::Brief(BriefState::True) | EventKind::Group(GroupState::True) if idle => {
            (Action::OpenAndRecord, Some(true))
        }
        EventKind::Brief(BriefState::False) | EventKind::Group(GroupState::False)
            if state == SessionState::Record =>
        {
            (Action::Close, Some(false))
        }
        EventKind::Brief(_) | EventKind::Group(_) => (Action::Skip, None),

        EventKind::Radio(button) => plan_radio(kind, button, session),

        EventKind::Call(_) if kind != RecorderKind::Phone => (Action::Skip, None),
        EventKind::Call(CallState::Calling | CallState::Incoming) if state == SessionState::Null => {
            (Action::Open, None)
        }
        EventKind::Call(CallState::Confirmed) => {
            let action = if state == SessionState::Setup {
                Action::Confirm
            } else {
                Action::Skip
            };
            (action, Some(true))
        }
        EventKind::Call(CallState::Disconnected) => {
            let action = if idle { Action::Skip } else { Action::Close };
            (action, Some(false))
        }
        EventKind::Call(_) => (Action::Skip, None),

        EventKind::Media(media) if media.is_hold() => {
            if !closed {
                (Action::Hold(media), None)
            } else {
                (Action::Skip, None)
            }
        }
        EventKind::Media(MediaState::Active) if state == SessionState::Pause => {
            (Action::Resume, Some(true))
        }
        EventKind::Media(_) => (Action::Skip, None),
    }
}

fn plan_radio(
    kind: RecorderKind,
    button: RadioButtonState,
    session: &Session,
) -> (Action, Option<bool>) {
    let own = match kind {
        RecorderKind::RadioTx => matches!(
            button,
            RadioButtonState::TxOn | RadioButtonState::TxOff | RadioButtonState::Invalid
        ),
        RecorderKind::RadioRx => matches!(
            button,
            RadioButtonState::RxOn | RadioButtonState::RxOff | RadioButtonState::Invalid
        ),
        _ => false,
    };
    if !own {
        return (Action::Skip, None);
    }

    let state = session.state();
    let closed = session.is_closed();
    let needs_start = session.needs_start();

    if button.is_off() && needs_start {
        (Action::Open, None)
    } else if button.is_on()
        && matches!(state, SessionState::Setup | SessionState::Pause)
        && !closed
    {
        (Action::KeyUp, Some(true))
    } else if button.is_off() && state == SessionState::Record && !closed {
        (Action::KeyDown, Some(false))
    } else if button.is_on() && needs_start {
        (Action::OpenAndKeyUp, Some(true))
    } else if button == RadioButtonState::Invalid
        && state > SessionState::Null
        && state < SessionState::Disconnect
        && !closed
    {
        (Action::Close, Some(false))
    } else {
        (Action::Skip, None)
    }
}

/// Drive `session` and `record` through `action`. A failed step closes the
/// session; errors never leave the channel.
pub async fn execute(
    action: Action,
    session: &mut Session,
    record: &mut CallRecord,
    connector: &dyn Connector,
) {
    let result = match action {
        Action::Skip => Ok(()),
        Action::OpenAndRecord => open_and_record(session, record, connector).await,
        Action::Open => open(session, record, connector).await,
        Action::OpenAndKeyUp => match open(session, record, connector).await {
            Ok(()) => key_up(session, record).await,
            Err(e) => Err(e),
        },
        Action::KeyUp => key_up(session, record).await,
        Action::KeyDown => key_down(session, record).await,
        Action::Confirm => {
            record.apply_preset(Preset::for_kind(session.kind(), Transition::Confirm));
            session.record(record).await
        }
        Action::Hold(media) => hold(session, record, media).await,
        Action::Resume => {
            record.apply_preset(Preset::for_kind(session.kind(), Transition::Pause));
            record.set_operation_value(Operation::Hold, Hold::Off.code().to_string());
            session.record(record).await
        }
        Action::Close => {
            if session.kind() == RecorderKind::Phone {
                record.operations_enabled = false;
            }
            record.apply_preset(Preset::for_kind(session.kind(), Transition::Disconnect));
            session.close_by_normal(record).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("{} {:?} failed: {}", session.key(), action, e);
        if session.state() != SessionState::Disconnect {
            session.close_by_err().await;
        }
    }
}

async fn open_and_record(
    session: &mut Session,
    record: &mut CallRecord,
    connector: &dyn Connector,
) -> Result<(), SessionError> {
    record.apply_preset(Preset::for_kind(session.kind(), Transition::Setup));
    let url = session.start(connector, record).await?;
    session.announce_and_attach(&url).await?;
    session.record(record).await
}

async fn open(
    session: &mut Session,
    record: &mut CallRecord,
    connector: &dyn Connector,
) -> Result<(), SessionError> {
    if session.kind().is_radio() && session.version() == Ed137Version::C {
        let tag = if session.kind() == RecorderKind::RadioTx {
            "_PTT_"
        } else {
            "_SQU_"
        };
        let call_ref = format!(
            "{}{}{}",
            record.property(Property::CallRef),
            tag,
            utils::random_4_digits()
        );
        record.set_property(Property::CallRef, call_ref);
    }
    record.apply_preset(Preset::for_kind(session.kind(), Transition::Setup));
    let url = session.start(connector, record).await?;
    session.announce_and_attach(&url).await?;
    session.set_parameter(Some(&url), record).await
}

fn set_button(record: &mut CallRecord, kind: RecorderKind, on: bool) {
    match (kind, on) {
        (RecorderKind::RadioTx, true) => {
            let value = record.ptt_on_value();
            record.set_operation_value(Operation::Ptt, value);
        }
        (RecorderKind::RadioTx, false) => record.set_operation_value(Operation::Ptt, "0"),
        (_, true) => record.set_operation_value(Operation::Squ, "1"),
        (_, false) => record.set_operation_value(Operation::Squ, "0"),
    }
}

async fn key_up(session: &mut Session, record: &mut CallRecord) -> Result<(), SessionError> {
    set_button(record, session.kind(), true);
    record.apply_preset(Preset::for_kind(session.kind(), Transition::Confirm));
    session.record(record).await
}

async fn key_down(session: &mut Session, record: &mut CallRecord) -> Result<(), SessionError> {
    set_button(record, session.kind(), false);
    record.apply_preset(Preset::for_kind(session.kind(), Transition::Pause));
    let cause = map_disconnect_cause(&record.sip_disconnect_cause, None);
    record.set_property(Property::DisconnectCause, cause.code().to_string());
    session.pause(record).await
}

/// Which party a phone hold applies to, from the call direction.
pub fn hold_party(media: MediaState, direction: Direction) -> Option<Hold> {
    match (media, direction) {
        (MediaState::LocalHold, Direction::Incoming) | (MediaState::RemoteHold, Direction::Outgoing) => {
            Some(Hold::CalledParty)
        }
        (MediaState::LocalHold, Direction::Outgoing) | (MediaState::RemoteHold, Direction::Incoming) => {
            Some(Hold::CallingParty)
        }
        _ => None,
    }
}

async fn hold(
    session: &mut Session,
    record: &mut CallRecord,
    media: MediaState,
) -> Result<(), SessionError> {
    let direction = Direction::parse(record.property(Property::Direction));
    if let Some(party) = hold_party(media, direction) {
        record.set_operation_value(Operation::Hold, party.code().to_string());
    }
    if session.state() == SessionState::Record {
        record.apply_preset(Preset::for_kind(session.kind(), Transition::Pause));
        session.pause(record).await
    } else {
        // outside RECORD the record keeps its setup-time visibility
        session.set_parameter(None, record).await
    }
}
