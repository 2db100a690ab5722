//! Prometheus text exposition encoding
//!
//! Renders a batch as one `name{k="v",...} value timestamp` line per
//! measurement, each newline-terminated. This is the minimal dialect the
//! import endpoint accepts: only `"` is escaped inside label values;
//! backslashes, braces and commas pass through untouched.

use crate::Measurement;

/// Encode a batch, preserving its order
///
/// An empty batch encodes to the empty string.
pub fn encode(batch: &[Measurement]) -> String {
    let mut out = String::new();
    for measurement in batch {
        encode_line(&mut out, measurement);
    }
    out
}

/// Append one newline-terminated line for `measurement` to `out`
pub fn encode_line(out: &mut String, measurement: &Measurement) {
    out.push_str(measurement.name());

    // No `{}` block at all when there are no labels.
    if !measurement.labels().is_empty() {
        out.push('{');
        for (i, (key, value)) in measurement.labels().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_label_value(value));
            out.push('"');
        }
        out.push('}');
    }

    out.push(' ');
    out.push_str(&measurement.value().to_string());

    if let Some(timestamp) = measurement.timestamp() {
        out.push(' ');
        out.push_str(&timestamp.to_string());
    }
    out.push('\n');
}

fn escape_label_value(value: &str) -> String {
    value.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(name: &str, value: f64) -> Measurement {
        Measurement::new(name, value).unwrap().at(1_700_000_000_000)
    }

    #[test]
    fn test_rows_total_line() {
        let batch = vec![m("rows_total", 42.0)
            .with_labels([("dataset", "x")])
            .unwrap()
            .with_identity("job1")];
        assert_eq!(
            encode(&batch),
            "rows_total{dataset=\"x\",job_name=\"job1\"} 42 1700000000000\n"
        );
    }

    #[test]
    fn test_unlabeled_line_has_no_braces() {
        assert_eq!(encode(&[m("up", 1.0)]), "up 1 1700000000000\n");
    }

    #[test]
    fn test_line_count_matches_batch() {
        let batch: Vec<_> = (0..5).map(|i| m("rows_total", i as f64)).collect();
        let encoded = encode(&batch);
        assert_eq!(encoded.lines().count(), 5);
        assert!(encoded.ends_with('\n'));
        assert_eq!(encoded.matches('\n').count(), 5);
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_preserves_order() {
        let encoded = encode(&[m("b", 1.0), m("a", 2.0)]);
        let names: Vec<_> = encoded
            .lines()
            .map(|l| l.split(' ').next().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_fractional_values() {
        assert_eq!(encode(&[m("ratio", 0.25)]), "ratio 0.25 1700000000000\n");
        assert_eq!(encode(&[m("delta", -3.5)]), "delta -3.5 1700000000000\n");
    }

    #[test]
    fn test_escapes_only_quotes() {
        let batch = vec![m("report", 1.0)
            .with_label("path", r#"s3://bucket/"daily"\{x},y"#)
            .unwrap()];
        let encoded = encode(&batch);
        assert_eq!(
            encoded,
            "report{path=\"s3://bucket/\\\"daily\\\"\\{x},y\"} 1 1700000000000\n"
        );
    }

    #[test]
    fn test_escaped_line_splits_on_label_block() {
        let batch = vec![m("report", 7.0)
            .with_label("title", r#"say "hi""#)
            .unwrap()];
        let encoded = encode(&batch);
        let line = encoded.trim_end();

        let open = line.find('{').unwrap();
        let close = line.rfind('}').unwrap();
        assert_eq!(&line[..open], "report");
        assert_eq!(&line[open + 1..close], r#"title="say \"hi\"""#);
        assert_eq!(&line[close + 1..], " 7 1700000000000");
    }

    #[test]
    fn test_missing_timestamp_is_omitted() {
        let unstamped = Measurement::new("up", 1.0).unwrap();
        assert_eq!(encode(&[unstamped]), "up 1\n");
    }
}
