use std::io;

use crate::{ExportError, Summary};

/// Write each round trip in milliseconds as one CSV row, under an `rtt_ms` header.
pub fn write_samples<W: io::Write>(writer: W, samples: &[f64]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["rtt_ms"])?;

    for rtt in samples {
        writer.write_record([rtt.to_string()])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the run summary as pretty-printed JSON.
pub fn write_summary<W: io::Write>(mut writer: W, summary: &Summary) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::Statistics;

    fn stats() -> (Statistics, Summary) {
        let start = Instant::now();
        let mut stats = Statistics::starting_at(0.5, start).unwrap();
        for rtt in [1.5, 0.25, 3.0] {
            stats.record_message();
            stats.record_rtt(rtt);
        }

        let summary = stats.summary_at(start + Duration::from_millis(1500));
        (stats, summary)
    }

    #[test]
    fn samples_csv() {
        let (stats, _) = stats();

        let mut buf = Vec::new();
        write_samples(&mut buf, stats.samples()).unwrap();

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        assert_eq!(reader.headers().unwrap(), vec!["rtt_ms"]);

        let rows: Vec<f64> = reader
            .records()
            .map(|record| record.unwrap()[0].parse().unwrap())
            .collect();
        assert_eq!(rows, vec![1.5, 0.25, 3.0]);
    }

    #[test]
    fn empty_csv() {
        let mut buf = Vec::new();
        write_samples(&mut buf, &[]).unwrap();

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        assert_eq!(reader.headers().unwrap(), vec!["rtt_ms"]);
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn summary_json() {
        let (_, summary) = stats();

        let mut buf = Vec::new();
        write_summary(&mut buf, &summary).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(json["messages"], 3);
        assert_eq!(json["elapsed_secs"], 1.5);
        assert_eq!(json["messages_per_second"], 2.0);
        assert_eq!(json["rtt"]["samples"], 3);
        assert_eq!(json["rtt"]["min"], 0.25);
        assert_eq!(json["rtt"]["max"], 3.0);
        assert_eq!(json["rtt"]["p50"], 1.5);
        assert_eq!(json["rtt"]["p99"], 3.0);
    }

    #[test]
    fn summary_json_without_samples() {
        let summary = Statistics::new(0.1).unwrap().summary();

        let mut buf = Vec::new();
        write_summary(&mut buf, &summary).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(json["messages"], 0);
        assert!(json["rtt"].is_null());
    }
}
