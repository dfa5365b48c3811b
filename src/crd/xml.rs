//! Renders a [`CallRecord`] as a `call-record-data` document, indented with
//! four spaces per level.

use super::{CallRecord, Operation, Property};
use std::fmt::Write;

const INDENT: &str = "    ";

pub fn render(record: &CallRecord) -> String {
    if record.disabled {
        return String::new();
    }

    let mut out = String::new();
    let _ = write!(
        out,
        "<call-record-data connref=\"{}\">",
        escape(&record.connection_ref)
    );

    let _ = write!(out, "\n{}<properties>", INDENT);
    let mut any = false;
    for property in Property::ALL {
        let attr = record.attribute(property);
        if !attr.visible || attr.value.is_empty() {
            continue;
        }
        any = true;
        let _ = write!(
            out,
            "\n{0}{0}<property name=\"{1}\">{2}</property>",
            INDENT,
            property.xml_name(),
            escape(&attr.value)
        );
    }
    if any {
        let _ = write!(out, "\n{}", INDENT);
    }
    out.push_str("</properties>");

    if record.operations_enabled {
        let _ = write!(out, "\n{}<operations>", INDENT);
        let mut any = false;
        for operation in Operation::ALL {
            let op = record.operation(operation);
            if !op.visible || op.value.is_empty() {
                continue;
            }
            if operation.is_timed() {
                if op.time.is_empty() {
                    continue;
                }
                let _ = write!(
                    out,
                    "\n{0}{0}<operation name=\"{1}\" time=\"{2}\">{3}</operation>",
                    INDENT,
                    operation.xml_name(),
                    escape(&op.time),
                    escape(&op.value)
                );
            } else {
                let _ = write!(
                    out,
                    "\n{0}{0}<operation name=\"{1}\">{2}</operation>",
                    INDENT,
                    operation.xml_name(),
                    escape(&op.value)
                );
            }
            any = true;
        }
        if any {
            let _ = write!(out, "\n{}", INDENT);
        }
        out.push_str("</operations>");
    }

    out.push_str("\n</call-record-data>");
    out
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            '\t' => escaped.push_str("&#x9;"),
            '\n' => escaped.push_str("&#xA;"),
            '\r' => escaped.push_str("&#xD;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
