use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of recorded entity. The numeric codes are the ones used by the
/// signaling layer when it reports state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderKind {
    Phone,
    RadioTx,
    RadioRx,
    Brief,
    Ambient,
    PhoneGroup,
    RadioGroup,
    BriefGroup,
}

impl RecorderKind {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Phone),
            1 => Some(Self::RadioTx),
            2 => Some(Self::RadioRx),
            3 => Some(Self::Brief),
            4 => Some(Self::Ambient),
            5 => Some(Self::PhoneGroup),
            6 => Some(Self::RadioGroup),
            7 => Some(Self::BriefGroup),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Phone => 0,
            Self::RadioTx => 1,
            Self::RadioRx => 2,
            Self::Brief => 3,
            Self::Ambient => 4,
            Self::PhoneGroup => 5,
            Self::RadioGroup => 6,
            Self::BriefGroup => 7,
        }
    }

    pub fn is_radio(self) -> bool {
        matches!(self, Self::RadioTx | Self::RadioRx)
    }

    pub fn is_group(self) -> bool {
        matches!(self, Self::PhoneGroup | Self::RadioGroup | Self::BriefGroup)
    }

    /// Group kinds record on group channels, ambient on every channel and
    /// all other kinds on non-group channels.
    pub fn records_on(self, group_channel: bool) -> bool {
        match self {
            Self::Ambient => true,
            kind if kind.is_group() => group_channel,
            _ => !group_channel,
        }
    }

    /// Path suffix of the recorder URL for an entity of this kind.
    pub fn url_suffix(self, name: &str) -> String {
        let name = name.to_lowercase();
        match self {
            Self::Phone => name,
            Self::Brief => format!("{}_brief", name),
            Self::Ambient => "ambient".to_string(),
            Self::PhoneGroup => "phone".to_string(),
            Self::RadioGroup => "radio".to_string(),
            Self::BriefGroup => "brief".to_string(),
            Self::RadioTx => format!("{}_ptt", name),
            Self::RadioRx => format!("{}_squ", name),
        }
    }

    /// Mailbox depth for this kind; radio bursts get twice the room.
    pub fn mailbox_capacity(self, base: usize) -> usize {
        if self.is_radio() {
            base * 2
        } else {
            base
        }
    }
}

impl fmt::Display for RecorderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Phone => "PHONE",
            Self::RadioTx => "RADIO_TX",
            Self::RadioRx => "RADIO_RX",
            Self::Brief => "BRIEF",
            Self::Ambient => "AMBIENT",
            Self::PhoneGroup => "PHONE_GROUP",
            Self::RadioGroup => "RADIO_GROUP",
            Self::BriefGroup => "BRIEF_GROUP",
        };
        f.write_str(label)
    }
}

/// Briefing recorder on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefState {
    False,
    True,
}

/// Group recorder on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    False,
    True,
}

impl BriefState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::False),
            1 => Some(Self::True),
            _ => None,
        }
    }
}

impl GroupState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::False),
            1 => Some(Self::True),
            _ => None,
        }
    }
}

/// Phone call (invite session) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Null,
    Calling,
    Incoming,
    Early,
    Connecting,
    Confirmed,
    Disconnected,
}

impl CallState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Calling),
            2 => Some(Self::Incoming),
            3 => Some(Self::Early),
            4 => Some(Self::Connecting),
            5 => Some(Self::Confirmed),
            6 => Some(Self::Disconnected),
            _ => None,
        }
    }
}

/// Phone call media state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    None,
    Active,
    LocalHold,
    RemoteHold,
    Error,
}

impl MediaState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Active),
            2 => Some(Self::LocalHold),
            3 => Some(Self::RemoteHold),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_hold(self) -> bool {
        matches!(self, Self::LocalHold | Self::RemoteHold)
    }
}

/// Radio push-to-talk / squelch button state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioButtonState {
    Invalid,
    TxOff,
    TxOn,
    RxOff,
    RxOn,
}

impl RadioButtonState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Invalid),
            1 => Some(Self::TxOff),
            2 => Some(Self::TxOn),
            3 => Some(Self::RxOff),
            4 => Some(Self::RxOn),
            _ => None,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, Self::TxOn | Self::RxOn)
    }

    pub fn is_off(self) -> bool {
        matches!(self, Self::TxOff | Self::RxOff)
    }
}

/// Call direction as carried in the `Direction` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unknown,
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "1" => Self::Incoming,
            "2" => Self::Outgoing,
            _ => Self::Unknown,
        }
    }
}

/// Which party a phone hold applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    Off = 0,
    CallingParty = 1,
    CalledParty = 2,
    Both = 3,
}

impl Hold {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Identity of a recorded entity. Ambient and group entities use an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub name: String,
    pub kind: RecorderKind,
}

impl EntityKey {
    pub fn new(name: impl Into<String>, kind: RecorderKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn channel(&self, index: usize) -> ChannelKey {
        ChannelKey {
            entity: self.clone(),
            index,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.kind)
    }
}

/// One recording channel of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub entity: EntityKey,
    pub index: usize,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, ch{})", self.entity.name, self.entity.kind, self.index)
    }
}

/// Identifier of a metadata field delivered alongside a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    VcsUser = 0,
    EndpointId = 1,
    ClientType = 2,
    Description = 3,
    GroupName = 4,
    AlertNr = 5,
    AlertTime = 6,
    CallingNr = 7,
    CalledNr = 8,
    ClientId = 9,
    CallRef = 10,
    ConnectTime = 11,
    SetupTime = 12,
    HoldTime = 13,
    DisconnectTime = 14,
    CallType = 15,
    Direction = 16,
    SipDisconnectCause = 17,
    Priority = 18,
    FrequencyId = 19,
    RadioAccessMode = 20,
    R2s = 21,
    PttType = 22,
}

impl FieldId {
    const ALL: [FieldId; 23] = [
        FieldId::VcsUser,
        FieldId::EndpointId,
        FieldId::ClientType,
        FieldId::Description,
        FieldId::GroupName,
        FieldId::AlertNr,
        FieldId::AlertTime,
        FieldId::CallingNr,
        FieldId::CalledNr,
        FieldId::ClientId,
        FieldId::CallRef,
        FieldId::ConnectTime,
        FieldId::SetupTime,
        FieldId::HoldTime,
        FieldId::DisconnectTime,
        FieldId::CallType,
        FieldId::Direction,
        FieldId::SipDisconnectCause,
        FieldId::Priority,
        FieldId::FrequencyId,
        FieldId::RadioAccessMode,
        FieldId::R2s,
        FieldId::PttType,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// A single (field, value) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub id: FieldId,
    pub value: String,
}

impl FieldValue {
    pub fn new(id: FieldId, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

/// Zip the comma-delimited value and id lists into field pairs, in order.
/// Unknown ids and ids without a matching value are skipped.
pub fn parse_fields(values: &str, ids: &str) -> Vec<FieldValue> {
    if ids.trim().is_empty() {
        return Vec::new();
    }
    let values: Vec<&str> = values.split(',').collect();
    ids.split(',')
        .enumerate()
        .filter_map(|(i, raw)| {
            let id = raw.trim().parse::<u32>().ok().and_then(FieldId::from_code)?;
            let value = values.get(i)?;
            Some(FieldValue::new(id, value.to_string()))
        })
        .collect()
}

/// State change carried through an entity's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Brief(BriefState),
    Group(GroupState),
    Call(CallState),
    Media(MediaState),
    Radio(RadioButtonState),
}

impl EventKind {
    /// Terminal events end the entity's lifetime once processed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Brief(BriefState::False)
                | EventKind::Group(GroupState::False)
                | EventKind::Call(CallState::Disconnected)
                | EventKind::Radio(RadioButtonState::Invalid)
        )
    }

    /// The event that winds down an entity of the given kind.
    pub fn terminal_for(kind: RecorderKind) -> Self {
        match kind {
            RecorderKind::Phone => EventKind::Call(CallState::Disconnected),
            RecorderKind::RadioTx | RecorderKind::RadioRx => {
                EventKind::Radio(RadioButtonState::Invalid)
            }
            RecorderKind::Brief => EventKind::Brief(BriefState::False),
            RecorderKind::Ambient
            | RecorderKind::PhoneGroup
            | RecorderKind::RadioGroup
            | RecorderKind::BriefGroup => EventKind::Group(GroupState::False),
        }
    }
}

/// A state change plus the metadata fields that came with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub fields: Vec<FieldValue>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(kind: EventKind, fields: Vec<FieldValue>) -> Self {
        Self { kind, fields }
    }
}
