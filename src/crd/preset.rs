//! Visibility presets: which properties and operations a record exposes for
//! each transition. Every field not listed for a preset is hidden.

use super::{CallRecord, Operation, Property};
use crate::protocol::RecorderKind;

/// Transition a channel goes through when its entity changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Setup,
    Confirm,
    Pause,
    Disconnect,
}

/// Preset families; each recorder kind maps onto one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetFamily {
    Phone,
    Radio,
    Brief,
    Group,
}

impl From<RecorderKind> for PresetFamily {
    fn from(kind: RecorderKind) -> Self {
        match kind {
            RecorderKind::Phone => PresetFamily::Phone,
            RecorderKind::RadioTx | RecorderKind::RadioRx => PresetFamily::Radio,
            RecorderKind::Brief => PresetFamily::Brief,
            RecorderKind::Ambient
            | RecorderKind::PhoneGroup
            | RecorderKind::RadioGroup
            | RecorderKind::BriefGroup => PresetFamily::Group,
        }
    }
}

/// A row of the visibility table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub family: PresetFamily,
    pub transition: Transition,
    pub properties: &'static [Property],
    /// `None` hides the operations block entirely
    pub operations: Option<&'static [Operation]>,
}

use super::Operation as O;
use super::Property as P;

const SETUP_PHONE: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::CallingNr,
    P::CalledNr,
    P::SetupTime,
    P::ClientId,
    P::Direction,
    P::CallRef,
    P::CallType,
    P::Priority,
];
const CONFIRM_PHONE: &[Property] = &[P::Vnd, P::ClientType, P::ConnectedNr, P::ConnectTime, P::ClientId];
const PAUSE_PHONE: &[Property] = &[P::Vnd, P::ClientType, P::ConnectedNr, P::ConnectedTime, P::ClientId];
const DISCONNECT_PHONE: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::DisconnectCause,
    P::DisconnectTime,
    P::ClientId,
];

const SETUP_RADIO: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::CallingNr,
    P::CalledNr,
    P::ClientId,
    P::Direction,
    P::Priority,
    P::SetupTime,
    P::ConnectTime,
];
const CONFIRM_RADIO: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::CallingNr,
    P::CalledNr,
    P::ClientId,
    P::Direction,
    P::Priority,
    P::SetupTime,
    P::ConnectTime,
    P::FrequencyId,
];
const PAUSE_RADIO: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::Priority,
    P::ClientId,
    P::FrequencyId,
    P::DisconnectCause,
];
const DISCONNECT_RADIO: &[Property] = &[
    P::Vnd,
    P::ClientType,
    P::DisconnectCause,
    P::DisconnectTime,
    P::ClientId,
];

const CONNECT_SHARED: &[Property] = &[P::ClientType, P::ConnectTime];
const DISCONNECT_SHARED: &[Property] = &[P::ClientType, P::DisconnectTime, P::DisconnectCause];

const OPS_PHONE_HOLD: &[Operation] = &[O::Hold];
const OPS_RADIO_SETUP: &[Operation] = &[O::Hold, O::RadioAccessMode, O::R2s, O::FrequencyId];
const OPS_RADIO_KEYED: &[Operation] = &[O::Hold, O::Ptt, O::Squ, O::FrequencyId];

const fn row(
    family: PresetFamily,
    transition: Transition,
    properties: &'static [Property],
    operations: Option<&'static [Operation]>,
) -> Preset {
    Preset {
        family,
        transition,
        properties,
        operations,
    }
}

/// The full table. Brief and group sessions only know connect and
/// disconnect: setup, confirm and pause all expose the connect set.
pub const PRESETS: [Preset; 16] = [
    row(PresetFamily::Phone, Transition::Setup, SETUP_PHONE, None),
    row(PresetFamily::Phone, Transition::Confirm, CONFIRM_PHONE, None),
    row(PresetFamily::Phone, Transition::Pause, PAUSE_PHONE, Some(OPS_PHONE_HOLD)),
    row(PresetFamily::Phone, Transition::Disconnect, DISCONNECT_PHONE, None),
    row(PresetFamily::Radio, Transition::Setup, SETUP_RADIO, Some(OPS_RADIO_SETUP)),
    row(PresetFamily::Radio, Transition::Confirm, CONFIRM_RADIO, Some(OPS_RADIO_KEYED)),
    row(PresetFamily::Radio, Transition::Pause, PAUSE_RADIO, Some(OPS_RADIO_KEYED)),
    row(PresetFamily::Radio, Transition::Disconnect, DISCONNECT_RADIO, None),
    row(PresetFamily::Brief, Transition::Setup, CONNECT_SHARED, None),
    row(PresetFamily::Brief, Transition::Confirm, CONNECT_SHARED, None),
    row(PresetFamily::Brief, Transition::Pause, CONNECT_SHARED, None),
    row(PresetFamily::Brief, Transition::Disconnect, DISCONNECT_SHARED, None),
    row(PresetFamily::Group, Transition::Setup, CONNECT_SHARED, None),
    row(PresetFamily::Group, Transition::Confirm, CONNECT_SHARED, None),
    row(PresetFamily::Group, Transition::Pause, CONNECT_SHARED, None),
    row(PresetFamily::Group, Transition::Disconnect, DISCONNECT_SHARED, None),
];

impl Preset {
    /// Look up the row for a family and transition.
    pub fn lookup(family: PresetFamily, transition: Transition) -> Preset {
        PRESETS
            .iter()
            .copied()
            .find(|p| p.family == family && p.transition == transition)
            .unwrap_or(PRESETS[0])
    }

    pub fn for_kind(kind: RecorderKind, transition: Transition) -> Preset {
        Self::lookup(PresetFamily::from(kind), transition)
    }

    pub(crate) fn apply(&self, record: &mut CallRecord) {
        for property in Property::ALL {
            record.set_property_visible(property, self.properties.contains(&property));
        }
        match self.operations {
            Some(visible) => {
                record.operations_enabled = true;
                for operation in Operation::ALL {
                    record.set_operation_visible(operation, visible.contains(&operation));
                }
            }
            None => record.operations_enabled = false,
        }
    }
}
