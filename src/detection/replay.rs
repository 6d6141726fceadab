//! Offline detector that replays a recorded detection log.
//!
//! Log format, one row per marker:
//!
//! ```text
//! call,id,x0,y0,x1,y1,x2,y2,x3,y3
//! 0,12,100.0,80.0,140.0,80.0,140.0,120.0,100.0,120.0
//! ```
//!
//! `call` is the zero-based index of the detection call the marker belongs to.
//! Calls with no rows replay as "no markers".

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use super::{Corner, DetectorFactory, ImageView, Marker, MarkerDetector};

const FIELDS_PER_ROW: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct DetectionLog {
    calls: BTreeMap<u64, Vec<Marker>>,
    /// One past the highest call index in the log.
    num_calls: u64,
}

impl DetectionLog {
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_csv(rdr).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .from_reader(reader);
        Self::from_csv(rdr)
    }

    fn from_csv<R: Read>(mut rdr: csv::Reader<R>) -> Result<Self> {
        let mut log = Self::default();
        for (row, rec) in rdr.records().enumerate() {
            let rec = rec?;
            let (call, marker) = parse_row(&rec).with_context(|| format!("row {}", row + 1))?;
            log.num_calls = log.num_calls.max(call + 1);
            log.calls.entry(call).or_default().push(marker);
        }
        debug!(
            calls = log.num_calls,
            markers = log.calls.values().map(Vec::len).sum::<usize>(),
            "loaded detection log"
        );
        Ok(log)
    }

    /// Markers recorded for a detection call; empty if the call has none.
    pub fn markers_for(&self, call: u64) -> &[Marker] {
        self.calls.get(&call).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_calls(&self) -> u64 {
        self.num_calls
    }

    pub fn is_empty(&self) -> bool {
        self.num_calls == 0
    }
}

fn parse_row(rec: &StringRecord) -> Result<(u64, Marker)> {
    if rec.len() < FIELDS_PER_ROW {
        bail!("expected {} fields, found {}", FIELDS_PER_ROW, rec.len());
    }
    let call: u64 = rec[0].trim().parse().context("bad call index")?;
    let id: i32 = rec[1].trim().parse().context("bad marker id")?;

    let mut corners = [Corner::new(0.0, 0.0); 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        let x: f64 = rec[2 + 2 * i].trim().parse().context("bad corner x")?;
        let y: f64 = rec[3 + 2 * i].trim().parse().context("bad corner y")?;
        *corner = Corner::new(x, y);
    }

    Ok((call, Marker { id, corners }))
}

/// Replays a `DetectionLog`, one call per `detect`, ignoring pixel content.
///
/// The call cursor is shared between detectors built by the same factory, so a
/// recreated channel resumes where the previous one stopped.
pub struct ReplayDetector {
    log: Arc<DetectionLog>,
    cursor: Arc<AtomicU64>,
    looping: bool,
}

impl ReplayDetector {
    pub fn new(log: Arc<DetectionLog>, looping: bool) -> Self {
        Self {
            log,
            cursor: Arc::new(AtomicU64::new(0)),
            looping,
        }
    }
}

impl MarkerDetector for ReplayDetector {
    fn detect(&mut self, _image: &ImageView<'_>) -> Result<Vec<Marker>> {
        let mut call = self.cursor.fetch_add(1, Ordering::SeqCst);
        if self.looping && self.log.num_calls() > 0 {
            call %= self.log.num_calls();
        }
        Ok(self.log.markers_for(call).to_vec())
    }
}

/// Factory producing replay detectors that share one call cursor.
pub fn replay_factory(log: Arc<DetectionLog>, looping: bool) -> DetectorFactory {
    let cursor = Arc::new(AtomicU64::new(0));
    Arc::new(move || -> Result<Box<dyn MarkerDetector>> {
        Ok(Box::new(ReplayDetector {
            log: log.clone(),
            cursor: cursor.clone(),
            looping,
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
call,id,x0,y0,x1,y1,x2,y2,x3,y3
0,12,100.0,80.0,140.0,80.0,140.0,120.0,100.0,120.0
# call 1 saw nothing
2,12,101.0,81.0,141.0,81.0,141.0,121.0,101.0,121.0
2,5, 10, 10, 20, 10, 20, 20, 10, 20
";

    fn blank() -> Vec<u8> {
        vec![0; 4]
    }

    fn view(data: &[u8]) -> ImageView<'_> {
        ImageView {
            width: 1,
            height: 1,
            data,
        }
    }

    #[test]
    fn test_parse_log() {
        let log = DetectionLog::from_reader(LOG.as_bytes()).unwrap();
        assert_eq!(log.num_calls(), 3);
        assert_eq!(log.markers_for(0).len(), 1);
        assert!(log.markers_for(1).is_empty());
        assert_eq!(log.markers_for(2).len(), 2);
        assert_eq!(log.markers_for(2)[1].id, 5);
        assert_eq!(log.markers_for(0)[0].corners[2], Corner::new(140.0, 120.0));
        assert!(log.markers_for(99).is_empty());
    }

    #[test]
    fn test_short_row_rejected() {
        let bad = "call,id,x0,y0\n0,1,2,3\n";
        let err = DetectionLog::from_reader(bad.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("row 1"));
    }

    #[test]
    fn test_replay_advances_and_stops() {
        let log = Arc::new(DetectionLog::from_reader(LOG.as_bytes()).unwrap());
        let mut detector = ReplayDetector::new(log, false);
        let pixels = blank();

        assert_eq!(detector.detect(&view(&pixels)).unwrap()[0].id, 12);
        assert!(detector.detect(&view(&pixels)).unwrap().is_empty());
        assert_eq!(detector.detect(&view(&pixels)).unwrap().len(), 2);
        // Past the end of the log: nothing more to replay.
        assert!(detector.detect(&view(&pixels)).unwrap().is_empty());
    }

    #[test]
    fn test_replay_loops() {
        let log = Arc::new(DetectionLog::from_reader(LOG.as_bytes()).unwrap());
        let mut detector = ReplayDetector::new(log, true);
        let pixels = blank();
        for _ in 0..3 {
            detector.detect(&view(&pixels)).unwrap();
        }
        assert_eq!(detector.detect(&view(&pixels)).unwrap()[0].id, 12);
    }

    #[test]
    fn test_factory_shares_cursor() {
        let log = Arc::new(DetectionLog::from_reader(LOG.as_bytes()).unwrap());
        let factory = replay_factory(log, false);
        let pixels = blank();

        let mut first = factory().unwrap();
        assert_eq!(first.detect(&view(&pixels)).unwrap().len(), 1);
        drop(first);

        let mut second = factory().unwrap();
        assert!(second.detect(&view(&pixels)).unwrap().is_empty());
        assert_eq!(second.detect(&view(&pixels)).unwrap().len(), 2);
    }

    #[test]
    fn test_from_csv_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.csv");
        std::fs::write(&path, LOG).unwrap();
        let log = DetectionLog::from_csv_path(&path).unwrap();
        assert_eq!(log.num_calls(), 3);

        assert!(DetectionLog::from_csv_path(dir.path().join("missing.csv")).is_err());
    }
}
