// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rendering of command results.

use serde_json::json;
use std::path::Path;
use tcg_storage::LockingRangeInfo;
use tcg_storage::transport::DeviceIdentity;
use tcg_storage_protocol::discovery::Feature;
use tcg_storage_protocol::discovery::Level0Discovery;
use tcg_storage_protocol::discovery::SscFeature;
use tcg_storage_protocol::token::Value;

/// How results are printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned text for people.
    Readable,
    /// One `key=value` line per field, for scripts.
    Normal,
    /// A JSON document.
    Json,
}

type Fields = Vec<(&'static str, serde_json::Value)>;

fn print_fields(format: OutputFormat, title: &str, fields: &Fields) {
    match format {
        OutputFormat::Readable => {
            println!("{title}:");
            for (key, value) in fields {
                println!("    {key:<28} {}", plain(value));
            }
        }
        OutputFormat::Normal => {
            let line: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{key}={}", plain(value)))
                .collect();
            println!("{title} {}", line.join(" "));
        }
        OutputFormat::Json => println!("{:#}", json!({ title: fields_object(fields) })),
    }
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => if *b { "Y" } else { "N" }.to_string(),
        other => other.to_string(),
    }
}

fn fields_object(fields: &Fields) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
    )
}

fn identity_fields(path: &Path, identity: &DeviceIdentity) -> Fields {
    vec![
        ("device", json!(path.display().to_string())),
        ("model", json!(identity.model)),
        ("firmware", json!(identity.firmware_revision)),
        ("serial", json!(identity.serial_string())),
    ]
}

fn ssc_fields(ssc: &SscFeature) -> Fields {
    vec![
        ("base_com_id", json!(format!("{:#06x}", ssc.base_com_id))),
        ("num_com_ids", json!(ssc.num_com_ids)),
        ("range_crossing", json!(ssc.range_crossing)),
        ("locking_admins", json!(ssc.num_locking_admins)),
        ("locking_users", json!(ssc.num_locking_users)),
        ("initial_pin", json!(ssc.initial_pin)),
        ("reverted_pin", json!(ssc.reverted_pin)),
    ]
}

fn feature_fields(feature: &Feature) -> (String, Fields) {
    match feature {
        Feature::Tper(f) => (
            "TPer".into(),
            vec![
                ("sync", json!(f.sync())),
                ("async", json!(f.async_())),
                ("ack_nak", json!(f.ack_nak())),
                ("buffer_management", json!(f.buffer_management())),
                ("streaming", json!(f.streaming())),
                ("com_id_management", json!(f.com_id_management())),
            ],
        ),
        Feature::Locking(f) => (
            "Locking".into(),
            vec![
                ("locking_supported", json!(f.locking_supported())),
                ("locking_enabled", json!(f.locking_enabled())),
                ("locked", json!(f.locked())),
                ("media_encryption", json!(f.media_encryption())),
                ("mbr_enabled", json!(f.mbr_enabled())),
                ("mbr_done", json!(f.mbr_done())),
            ],
        ),
        Feature::Geometry(f) => (
            "Geometry".into(),
            vec![
                ("align_required", json!(f.align_required)),
                ("logical_block_size", json!(f.logical_block_size)),
                ("alignment_granularity", json!(f.alignment_granularity)),
                ("lowest_aligned_lba", json!(f.lowest_aligned_lba)),
            ],
        ),
        Feature::Enterprise(f) => ("Enterprise".into(), ssc_fields(f)),
        Feature::Opal1(f) => ("Opal 1.0".into(), ssc_fields(f)),
        Feature::Opal2(f) => ("Opal 2.0".into(), ssc_fields(f)),
        Feature::SingleUserMode(f) => (
            "Single User Mode".into(),
            vec![
                ("locking_objects", json!(f.number_of_locking_objects)),
                ("any_in_sum", json!(f.any_in_sum)),
                ("all_in_sum", json!(f.all_in_sum)),
                ("policy", json!(f.policy)),
            ],
        ),
        Feature::DataStore(f) => (
            "DataStore".into(),
            vec![
                ("max_tables", json!(f.max_tables)),
                ("max_size", json!(f.max_size)),
                ("alignment", json!(f.alignment)),
            ],
        ),
        Feature::Unknown {
            code,
            version,
            data,
        } => (
            format!("Feature {code:#06x}"),
            vec![("version", json!(version)), ("data", json!(hex::encode(data)))],
        ),
    }
}

/// Prints identity, Level 0 Discovery and the TPer properties.
pub fn query(
    format: OutputFormat,
    path: &Path,
    identity: &DeviceIdentity,
    discovery: &Level0Discovery,
    properties: Option<&[(String, u64)]>,
) {
    let features: Vec<_> = discovery.features.iter().map(feature_fields).collect();
    match format {
        OutputFormat::Json => {
            let features: serde_json::Map<_, _> = features
                .iter()
                .map(|(name, fields)| (name.clone(), fields_object(fields)))
                .collect();
            let doc = json!({
                "identity": fields_object(&identity_fields(path, identity)),
                "level0": {
                    "major_version": discovery.major_version,
                    "minor_version": discovery.minor_version,
                    "features": features,
                },
                "properties": properties.map(|props| {
                    props
                        .iter()
                        .map(|(name, value)| (name.clone(), json!(value)))
                        .collect::<serde_json::Map<_, _>>()
                }),
            });
            println!("{doc:#}");
        }
        _ => {
            print_fields(format, "Device", &identity_fields(path, identity));
            for (name, fields) in &features {
                print_fields(format, name, fields);
            }
            if let Some(props) = properties {
                if format == OutputFormat::Readable {
                    println!("TPer properties:");
                }
                for (name, value) in props {
                    let name = name.escape_default();
                    match format {
                        OutputFormat::Readable => println!("    {name:<28} {value}"),
                        _ => println!("property {name}={value}"),
                    }
                }
            }
        }
    }
}

/// One line of `scan` output.
pub struct ScanEntry {
    pub path: String,
    /// `1`, `2` and `E` for Opal 1.0, Opal 2.0 and Enterprise support.
    pub ssc: String,
    pub identity: Option<DeviceIdentity>,
}

pub fn scan(format: OutputFormat, entries: &[ScanEntry]) {
    match format {
        OutputFormat::Json => {
            let doc: Vec<_> = entries
                .iter()
                .map(|e| {
                    json!({
                        "device": e.path,
                        "ssc": e.ssc,
                        "model": e.identity.as_ref().map(|i| i.model.clone()),
                        "firmware": e.identity.as_ref().map(|i| i.firmware_revision.clone()),
                        "serial": e.identity.as_ref().map(|i| i.serial_string()),
                    })
                })
                .collect();
            println!("{:#}", serde_json::Value::Array(doc));
        }
        _ => {
            if format == OutputFormat::Readable {
                println!("Scanning for Opal compliant disks");
            }
            for e in entries {
                let ssc = if e.ssc.is_empty() { "No" } else { &e.ssc };
                match &e.identity {
                    Some(id) => println!(
                        "{:<14} {:<4} {:<40} {:<8} {}",
                        e.path,
                        ssc,
                        id.model,
                        id.firmware_revision,
                        id.serial_string()
                    ),
                    None => println!("{:<14} {ssc}", e.path),
                }
            }
        }
    }
}

pub fn ranges(format: OutputFormat, ranges: &[LockingRangeInfo]) {
    match format {
        OutputFormat::Json => {
            let doc: Vec<_> = ranges
                .iter()
                .map(|r| {
                    json!({
                        "range": r.range,
                        "start": r.start,
                        "length": r.length,
                        "read_lock_enabled": r.read_lock_enabled,
                        "write_lock_enabled": r.write_lock_enabled,
                        "read_locked": r.read_locked,
                        "write_locked": r.write_locked,
                    })
                })
                .collect();
            println!("{:#}", serde_json::Value::Array(doc));
        }
        OutputFormat::Readable => {
            println!(
                "{:>5} {:>20} {:>20} {:>4} {:>4} {:>4} {:>4}",
                "Range", "Start", "Length", "RLKE", "WLKE", "RLck", "WLck"
            );
            let yn = |b: bool| if b { "Y" } else { "N" };
            for r in ranges {
                println!(
                    "{:>5} {:>20} {:>20} {:>4} {:>4} {:>4} {:>4}",
                    r.range,
                    r.start,
                    r.length,
                    yn(r.read_lock_enabled),
                    yn(r.write_lock_enabled),
                    yn(r.read_locked),
                    yn(r.write_locked)
                );
            }
        }
        OutputFormat::Normal => {
            for r in ranges {
                print_fields(
                    format,
                    &format!("range{}", r.range),
                    &vec![
                        ("start", json!(r.start)),
                        ("length", json!(r.length)),
                        ("read_lock_enabled", json!(r.read_lock_enabled)),
                        ("write_lock_enabled", json!(r.write_lock_enabled)),
                        ("read_locked", json!(r.read_locked)),
                        ("write_locked", json!(r.write_locked)),
                    ],
                );
            }
        }
    }
}

/// A decoded token value as JSON. Byte strings become hex.
pub fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Uint(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::Bytes(b) => json!(hex::encode(b)),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_json).collect()),
        Value::Named(name, value) => json!({
            "name": value_json(name),
            "value": value_json(value),
        }),
        Value::Call => json!("Call"),
        Value::EndOfData => json!("EndOfData"),
        Value::EndOfSession => json!("EndOfSession"),
        Value::StartTransaction => json!("StartTransaction"),
        Value::EndTransaction => json!("EndTransaction"),
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    let indent = "    ".repeat(depth);
    match value {
        Value::List(items) => {
            out.push_str(&format!("{indent}[\n"));
            for item in items {
                write_value(out, item, depth + 1);
            }
            out.push_str(&format!("{indent}]\n"));
        }
        Value::Named(name, value) => {
            let name = match name.as_ref() {
                Value::Uint(v) => v.to_string(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => value_json(other).to_string(),
            };
            match value.as_ref() {
                Value::List(_) | Value::Named(..) => {
                    out.push_str(&format!("{indent}{name} =\n"));
                    write_value(out, value, depth + 1);
                }
                leaf => out.push_str(&format!("{indent}{name} = {}\n", value_json(leaf))),
            }
        }
        leaf => out.push_str(&format!("{indent}{}\n", value_json(leaf))),
    }
}

/// Prints the result list of a raw method call.
pub fn values(format: OutputFormat, values: &[Value]) {
    match format {
        OutputFormat::Json => {
            let doc = serde_json::Value::Array(values.iter().map(value_json).collect());
            println!("{doc:#}");
        }
        _ => {
            let mut out = String::new();
            for value in values {
                write_value(&mut out, value, 0);
            }
            print!("{out}");
        }
    }
}

/// Reports a key/value result such as the MSID.
pub fn field(format: OutputFormat, key: &'static str, value: &str) {
    match format {
        OutputFormat::Json => println!("{:#}", json!({ key: value })),
        OutputFormat::Readable => println!("{key}: {value}"),
        OutputFormat::Normal => println!("{key}={value}"),
    }
}

/// Reports that a state-changing operation completed.
pub fn done(format: OutputFormat, operation: &str, path: &Path) {
    match format {
        OutputFormat::Json => println!(
            "{:#}",
            json!({
                "operation": operation,
                "device": path.display().to_string(),
                "result": "ok",
            })
        ),
        OutputFormat::Readable => println!("{operation} complete on {}", path.display()),
        OutputFormat::Normal => println!("{operation} ok"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_render_as_json() {
        let v = Value::List(vec![
            Value::named(3u64, Value::Bytes(vec![0xde, 0xad])),
            Value::Uint(7),
        ]);
        assert_eq!(
            value_json(&v),
            json!([{ "name": 3, "value": "dead" }, 7])
        );
    }

    #[test]
    fn nested_values_indent() {
        let mut out = String::new();
        write_value(
            &mut out,
            &Value::List(vec![Value::named(1u64, Value::Uint(0))]),
            0,
        );
        assert_eq!(out, "[\n    1 = 0\n]\n");
    }

    #[test]
    fn plain_booleans() {
        assert_eq!(plain(&json!(true)), "Y");
        assert_eq!(plain(&json!("x")), "x");
        assert_eq!(plain(&json!(12)), "12");
    }
}
