//! Call-record data: the per-channel metadata document pushed to the
//! recorder with every protocol verb.
//!
//! A record is a fixed, ordered list of property and operation descriptors.
//! Each descriptor carries a value, a visibility flag and (for timed
//! operations) a timestamp. Presets in [`preset`] flip the visibility flags
//! for a transition; [`xml`] walks the list in order to build the document.

pub mod cause;
pub mod preset;
pub mod xml;

pub use cause::{map_disconnect_cause, Q931Cause};
pub use preset::{Preset, PresetFamily, Transition};

use crate::config::Ed137Version;
use crate::protocol::{Direction, FieldId, FieldValue, RecorderKind};
use crate::utils;

/// Properties in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Vnd,
    CallingNr,
    CalledNr,
    ConnectedNr,
    CallType,
    ClientId,
    ClientType,
    ConnectedTime,
    ConnectTime,
    Direction,
    DisconnectCause,
    DisconnectTime,
    Priority,
    SetupTime,
    FrequencyId,
    CallRef,
    AlertNr,
    AlertTime,
}

impl Property {
    pub const ALL: [Property; 18] = [
        Property::Vnd,
        Property::CallingNr,
        Property::CalledNr,
        Property::ConnectedNr,
        Property::CallType,
        Property::ClientId,
        Property::ClientType,
        Property::ConnectedTime,
        Property::ConnectTime,
        Property::Direction,
        Property::DisconnectCause,
        Property::DisconnectTime,
        Property::Priority,
        Property::SetupTime,
        Property::FrequencyId,
        Property::CallRef,
        Property::AlertNr,
        Property::AlertTime,
    ];

    /// Value of the `name` attribute.
    pub fn xml_name(self) -> &'static str {
        match self {
            Property::Vnd => "vnd.Dicom",
            Property::CallingNr => "CallingNr",
            Property::CalledNr => "CalledNr",
            Property::ConnectedNr => "ConnectedNr",
            Property::CallType => "CallType",
            Property::ClientId => "ClientId",
            Property::ClientType => "ClientType",
            Property::ConnectedTime => "ConnectedTime",
            Property::ConnectTime => "ConnectTime",
            Property::Direction => "Direction",
            Property::DisconnectCause => "DisconnectCause",
            Property::DisconnectTime => "DisconnectTime",
            Property::Priority => "Priority",
            Property::SetupTime => "SetupTime",
            Property::FrequencyId => "FrequencyID",
            Property::CallRef => "CallRef",
            Property::AlertNr => "AlertNr",
            Property::AlertTime => "AlertTime",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Operations in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Hold,
    Ptt,
    Squ,
    RadioAccessMode,
    BssQualityIndex,
    SimultaneousTransmission,
    R2s,
    R2sTlv,
    Voting,
    VcsDicomR2s,
    FrequencyId,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::Hold,
        Operation::Ptt,
        Operation::Squ,
        Operation::RadioAccessMode,
        Operation::BssQualityIndex,
        Operation::SimultaneousTransmission,
        Operation::R2s,
        Operation::R2sTlv,
        Operation::Voting,
        Operation::VcsDicomR2s,
        Operation::FrequencyId,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            Operation::Hold => "HOLD",
            Operation::Ptt => "PTT",
            Operation::Squ => "SQU",
            Operation::RadioAccessMode => "RadioAccessMode",
            Operation::BssQualityIndex => "BSS Quality Index",
            Operation::SimultaneousTransmission => "Simultaneous Transmission",
            Operation::R2s => "R2S",
            Operation::R2sTlv => "R2S_TLV",
            Operation::Voting => "VOTING",
            Operation::VcsDicomR2s => "VcsDicomR2S",
            Operation::FrequencyId => "FrequencyID",
        }
    }

    /// Timed operations carry a `time` attribute and are only emitted once
    /// both value and time are known.
    pub fn is_timed(self) -> bool {
        !matches!(
            self,
            Operation::BssQualityIndex
                | Operation::SimultaneousTransmission
                | Operation::Voting
                | Operation::VcsDicomR2s
        )
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A named value with a visibility flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribute {
    pub value: String,
    pub visible: bool,
}

/// An operation value, its timestamp and visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubOperation {
    pub value: String,
    pub time: String,
    pub visible: bool,
}

/// Metadata record of one recording channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// `connref` attribute of the document
    pub connection_ref: String,
    /// Monitoring calls disable the whole document
    pub disabled: bool,
    /// First path segment of the recorder URL
    pub vcs_user: String,
    /// PTT value override for transmit radios
    pub ptt_type: String,
    /// SIP status code reported by the signaling layer; never serialized
    pub sip_disconnect_cause: String,
    pub operations_enabled: bool,
    properties: Vec<Attribute>,
    operations: Vec<SubOperation>,
}

impl Default for CallRecord {
    fn default() -> Self {
        let visible = Attribute {
            value: String::new(),
            visible: true,
        };
        let visible_op = SubOperation {
            visible: true,
            ..SubOperation::default()
        };
        Self {
            connection_ref: String::new(),
            disabled: false,
            vcs_user: String::new(),
            ptt_type: String::new(),
            sip_disconnect_cause: String::new(),
            operations_enabled: false,
            properties: vec![visible; Property::ALL.len()],
            operations: vec![visible_op; Operation::ALL.len()],
        }
    }
}

const OB_SUFFIX: &str = ";ob";

impl CallRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(&self, property: Property) -> &str {
        &self.properties[property.index()].value
    }

    pub fn set_property(&mut self, property: Property, value: impl Into<String>) {
        self.properties[property.index()].value = value.into();
    }

    pub fn attribute(&self, property: Property) -> &Attribute {
        &self.properties[property.index()]
    }

    pub fn operation(&self, operation: Operation) -> &SubOperation {
        &self.operations[operation.index()]
    }

    pub fn set_operation_value(&mut self, operation: Operation, value: impl Into<String>) {
        self.operations[operation.index()].value = value.into();
    }

    pub fn set_operation_time(&mut self, operation: Operation, time: impl Into<String>) {
        self.operations[operation.index()].time = time.into();
    }

    pub(crate) fn set_property_visible(&mut self, property: Property, visible: bool) {
        self.properties[property.index()].visible = visible;
    }

    pub(crate) fn set_operation_visible(&mut self, operation: Operation, visible: bool) {
        self.operations[operation.index()].visible = visible;
    }

    /// Apply a transition preset to the visibility flags.
    pub fn apply_preset(&mut self, preset: Preset) {
        preset.apply(self);
    }

    /// Serialize to the call-record-data document. A disabled record
    /// serializes to an empty document.
    pub fn to_xml(&self) -> String {
        xml::render(self)
    }

    /// Forget the connection reference so the next field update derives a new one.
    pub fn reset_connection_ref(&mut self) {
        self.connection_ref.clear();
    }

    /// Append a labelled segment to the vendor string unless one with the
    /// same label is already present.
    fn append_vendor(&mut self, label: &str, value: &str) {
        let vnd = &mut self.properties[Property::Vnd.index()].value;
        if vnd.contains(label) {
            return;
        }
        if !vnd.is_empty() {
            vnd.push_str(", ");
        }
        vnd.push_str(label);
        vnd.push_str(" = ");
        vnd.push_str(value);
    }

    /// Free-text vendor note: stored bare when it opens the vendor string,
    /// labelled otherwise.
    fn append_vendor_note(&mut self, label: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        if self.property(Property::Vnd).is_empty() {
            self.set_property(Property::Vnd, value);
        } else {
            self.append_vendor(label, value);
        }
    }

    /// Update the record from signaling fields, in order. Field semantics
    /// depend on the protocol version of the channel and the entity kind.
    pub fn apply_fields(&mut self, fields: &[FieldValue], version: Ed137Version, kind: RecorderKind) {
        if kind.is_radio() {
            self.operations_enabled = true;
        }
        let newest = version == Ed137Version::C;

        for field in fields {
            let value = field.value.as_str();
            match field.id {
                FieldId::VcsUser => {
                    if self.vcs_user.is_empty() {
                        self.vcs_user = value.to_string();
                    }
                    match kind {
                        RecorderKind::RadioTx => self.append_vendor("Radio Selection", "TX"),
                        RecorderKind::RadioRx => self.append_vendor("Radio Selection", "RX"),
                        _ => {}
                    }
                }
                FieldId::EndpointId => self.append_vendor("TGW Port", value),
                FieldId::ClientType => self.set_property(Property::ClientType, value),
                FieldId::Description => self.append_vendor_note("desc", value),
                FieldId::GroupName => self.append_vendor_note("group name", value),
                FieldId::AlertNr => self.set_property(Property::AlertNr, trim_ob(value)),
                FieldId::AlertTime => self.set_property(Property::AlertTime, value),
                FieldId::CallingNr => self.set_property(Property::CallingNr, trim_ob(value)),
                FieldId::CalledNr => {
                    let called = trim_ob(value);
                    self.set_property(Property::CalledNr, called);
                    self.set_property(Property::ConnectedNr, called);
                }
                FieldId::ClientId => {
                    self.set_property(Property::ClientId, trim_ob(value));
                    if newest {
                        self.set_property(Property::ClientType, "CWP");
                    }
                }
                FieldId::CallRef => {
                    if newest || kind == RecorderKind::Phone {
                        self.set_property(Property::CallRef, value);
                    }
                }
                FieldId::ConnectTime => match kind {
                    RecorderKind::Phone => {
                        self.set_property(Property::ConnectTime, value);
                        self.set_property(Property::ConnectedTime, value);
                    }
                    RecorderKind::RadioTx => {
                        self.set_operation_time(Operation::Ptt, value);
                        self.set_operation_time(Operation::FrequencyId, value);
                    }
                    RecorderKind::RadioRx => {
                        self.set_property(Property::ConnectTime, value);
                        self.set_operation_time(Operation::Squ, value);
                        self.set_operation_time(Operation::FrequencyId, value);
                    }
                    _ => self.set_property(Property::ConnectTime, value),
                },
                FieldId::SetupTime => {
                    self.set_property(Property::SetupTime, value);
                    if kind != RecorderKind::Phone && newest {
                        self.set_operation_time(Operation::RadioAccessMode, value);
                        self.set_property(Property::ConnectTime, value);
                        self.set_operation_time(Operation::R2s, value);
                        self.set_operation_time(Operation::FrequencyId, value);
                    }
                }
                FieldId::HoldTime => match kind {
                    RecorderKind::Phone => self.set_operation_time(Operation::Hold, value),
                    RecorderKind::RadioTx => self.set_operation_time(Operation::Ptt, value),
                    RecorderKind::RadioRx => self.set_operation_time(Operation::Squ, value),
                    _ => {}
                },
                FieldId::DisconnectTime => self.set_property(Property::DisconnectTime, value),
                FieldId::CallType => {
                    if newest || kind == RecorderKind::Phone {
                        self.set_property(Property::CallType, value);
                        if value.contains("monitoring") {
                            self.disabled = true;
                        }
                    }
                }
                FieldId::Direction => self.set_property(Property::Direction, value),
                FieldId::SipDisconnectCause => self.sip_disconnect_cause = value.to_string(),
                FieldId::Priority => self.set_property(Property::Priority, priority_code(value)),
                FieldId::FrequencyId => match version {
                    Ed137Version::B => self.set_property(Property::FrequencyId, value),
                    Ed137Version::C => self.set_operation_value(Operation::FrequencyId, value),
                    Ed137Version::A => {}
                },
                FieldId::RadioAccessMode => {
                    if kind == RecorderKind::RadioRx {
                        let mode = match value.trim() {
                            "1" => "1",
                            "2" => "2",
                            "3" => "3",
                            _ => "0",
                        };
                        self.set_operation_value(Operation::RadioAccessMode, mode);
                    }
                }
                FieldId::R2s => {
                    if version != Ed137Version::B && kind != RecorderKind::RadioTx {
                        self.set_operation_value(Operation::R2s, format!("Rx={}", value));
                    }
                }
                FieldId::PttType => {
                    if kind == RecorderKind::RadioTx {
                        self.ptt_type = value.to_string();
                    }
                }
            }
        }

        if self.connection_ref.is_empty() {
            self.connection_ref = self.derive_connection_ref();
        }
    }

    fn derive_connection_ref(&self) -> String {
        let token = utils::random_conref();
        let direction = self.property(Property::Direction);
        let number = match direction {
            "" | "0" => return token,
            _ if Direction::parse(direction) == Direction::Incoming => {
                self.property(Property::CalledNr)
            }
            _ => self.property(Property::CallingNr),
        };
        let domain = number.split('@').nth(1).unwrap_or(number);
        format!("{}@{}", token, domain)
    }

    /// Value the PTT operation takes when a transmit radio keys up.
    pub fn ptt_on_value(&self) -> String {
        match self.ptt_type.as_str() {
            "" | "0" => "1".to_string(),
            other => other.to_string(),
        }
    }
}

fn trim_ob(value: &str) -> &str {
    value.strip_suffix(OB_SUFFIX).unwrap_or(value)
}

fn priority_code(value: &str) -> &'static str {
    match value.to_uppercase().as_str() {
        "NORMAL" => "3",
        "EMERGENCY" => "1",
        "URGENT" => "2",
        _ => "4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(FieldId, &str)]) -> Vec<FieldValue> {
        pairs.iter().map(|(id, v)| FieldValue::new(*id, *v)).collect()
    }

    #[test]
    fn test_numbers_are_trimmed_and_connected_follows_called() {
        let mut record = CallRecord::new();
        record.apply_fields(
            &fields(&[
                (FieldId::CallingNr, "1001@vcs.local;ob"),
                (FieldId::CalledNr, "2002@tower.local;ob"),
            ]),
            Ed137Version::B,
            RecorderKind::Phone,
        );
        assert_eq!(record.property(Property::CallingNr), "1001@vcs.local");
        assert_eq!(record.property(Property::CalledNr), "2002@tower.local");
        assert_eq!(record.property(Property::ConnectedNr), "2002@tower.local");
    }

    #[test]
    fn test_connection_ref_uses_direction_domain() {
        let mut incoming = CallRecord::new();
        incoming.apply_fields(
            &fields(&[
                (FieldId::CallingNr, "1001@caller.net"),
                (FieldId::CalledNr, "2002@called.net"),
                (FieldId::Direction, "1"),
            ]),
            Ed137Version::B,
            RecorderKind::Phone,
        );
        assert!(incoming.connection_ref.ends_with("@called.net"));

        let mut outgoing = CallRecord::new();
        outgoing.apply_fields(
            &fields(&[(FieldId::CallingNr, "1001"), (FieldId::Direction, "2")]),
            Ed137Version::B,
            RecorderKind::Phone,
        );
        assert!(outgoing.connection_ref.ends_with("@1001"));

        let mut unknown = CallRecord::new();
        unknown.apply_fields(&[], Ed137Version::B, RecorderKind::Phone);
        assert!(!unknown.connection_ref.contains('@'));
        assert_eq!(unknown.connection_ref.len(), 8 + 1 + 4 + 1 + 4 + 1 + 8);
    }

    #[test]
    fn test_connection_ref_first_write_wins() {
        let mut record = CallRecord::new();
        record.apply_fields(&fields(&[(FieldId::Direction, "0")]), Ed137Version::B, RecorderKind::Phone);
        let first = record.connection_ref.clone();
        record.apply_fields(&fields(&[(FieldId::Direction, "1")]), Ed137Version::B, RecorderKind::Phone);
        assert_eq!(record.connection_ref, first);

        record.reset_connection_ref();
        record.apply_fields(&[], Ed137Version::B, RecorderKind::Phone);
        assert_ne!(record.connection_ref, first);
    }

    #[test]
    fn test_vendor_segments_are_appended_once() {
        let mut record = CallRecord::new();
        let update = fields(&[
            (FieldId::VcsUser, "Op1"),
            (FieldId::EndpointId, "7"),
            (FieldId::Description, "tower"),
        ]);
        record.apply_fields(&update, Ed137Version::C, RecorderKind::RadioTx);
        record.apply_fields(&update, Ed137Version::C, RecorderKind::RadioTx);
        assert_eq!(
            record.property(Property::Vnd),
            "Radio Selection = TX, TGW Port = 7, desc = tower"
        );
        assert_eq!(record.vcs_user, "Op1");
        assert!(record.operations_enabled);
    }

    #[test]
    fn test_vendor_note_opens_bare() {
        let mut record = CallRecord::new();
        record.apply_fields(
            &fields(&[(FieldId::Description, "Tower West")]),
            Ed137Version::B,
            RecorderKind::Phone,
        );
        assert_eq!(record.property(Property::Vnd), "Tower West");

        record.apply_fields(
            &fields(&[(FieldId::GroupName, "Approach"), (FieldId::GroupName, "Ground")]),
            Ed137Version::B,
            RecorderKind::Phone,
        );
        assert_eq!(
            record.property(Property::Vnd),
            "Tower West, group name = Approach"
        );

        let mut group = CallRecord::new();
        group.apply_fields(
            &fields(&[(FieldId::GroupName, ""), (FieldId::GroupName, "Approach")]),
            Ed137Version::B,
            RecorderKind::PhoneGroup,
        );
        assert_eq!(group.property(Property::Vnd), "Approach");
    }

    #[test]
    fn test_version_gated_fields() {
        let update = fields(&[
            (FieldId::CallRef, "ref-1"),
            (FieldId::CallType, "monitoring call"),
            (FieldId::FrequencyId, "118.1"),
            (FieldId::ClientId, "cwp-3;ob"),
        ]);

        let mut older = CallRecord::new();
        older.apply_fields(&update, Ed137Version::B, RecorderKind::RadioRx);
        assert_eq!(older.property(Property::CallRef), "");
        assert!(!older.disabled);
        assert_eq!(older.property(Property::FrequencyId), "118.1");
        assert_eq!(older.property(Property::ClientType), "");

        let mut newest = CallRecord::new();
        newest.apply_fields(&update, Ed137Version::C, RecorderKind::RadioRx);
        assert_eq!(newest.property(Property::CallRef), "ref-1");
        assert!(newest.disabled);
        assert_eq!(newest.operation(Operation::FrequencyId).value, "118.1");
        assert_eq!(newest.property(Property::ClientId), "cwp-3");
        assert_eq!(newest.property(Property::ClientType), "CWP");
    }

    #[test]
    fn test_radio_only_fields() {
        let update = fields(&[
            (FieldId::RadioAccessMode, "7"),
            (FieldId::R2s, "42"),
            (FieldId::PttType, "3"),
            (FieldId::Priority, "emergency"),
        ]);

        let mut rx = CallRecord::new();
        rx.apply_fields(&update, Ed137Version::C, RecorderKind::RadioRx);
        assert_eq!(rx.operation(Operation::RadioAccessMode).value, "0");
        assert_eq!(rx.operation(Operation::R2s).value, "Rx=42");
        assert_eq!(rx.ptt_type, "");
        assert_eq!(rx.property(Property::Priority), "1");

        let mut tx = CallRecord::new();
        tx.apply_fields(&update, Ed137Version::C, RecorderKind::RadioTx);
        assert_eq!(tx.operation(Operation::RadioAccessMode).value, "");
        assert_eq!(tx.operation(Operation::R2s).value, "");
        assert_eq!(tx.ptt_on_value(), "3");
    }

    #[test]
    fn test_times_fan_out_by_kind() {
        let mut tx = CallRecord::new();
        tx.apply_fields(
            &fields(&[(FieldId::ConnectTime, "t1"), (FieldId::HoldTime, "t2")]),
            Ed137Version::C,
            RecorderKind::RadioTx,
        );
        assert_eq!(tx.operation(Operation::Ptt).time, "t2");
        assert_eq!(tx.operation(Operation::FrequencyId).time, "t1");
        assert_eq!(tx.property(Property::ConnectTime), "");

        let mut phone = CallRecord::new();
        phone.apply_fields(
            &fields(&[(FieldId::ConnectTime, "t1"), (FieldId::SetupTime, "t0")]),
            Ed137Version::C,
            RecorderKind::Phone,
        );
        assert_eq!(phone.property(Property::ConnectedTime), "t1");
        assert_eq!(phone.property(Property::SetupTime), "t0");
        assert_eq!(phone.operation(Operation::R2s).time, "");
    }
}
