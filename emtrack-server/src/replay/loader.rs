//! CSV recording loader.
//!
//! Reads a tabular recording with one row per sample and produces a
//! [`Recording`]. Two header layouts are recognized:
//!
//! - The tracker export layout (`SEU`, `Frame`, `X1 (M)`, `Y1`, `Z1`,
//!   `Qw1`, `Qx1`, `Qy1`, `Qz1`, extra columns ignored). `Frame` carries
//!   integer milliseconds and is normalized to seconds.
//! - A generic layout (`sensor`, `timestamp`, `x`, `y`, `z`, `qw`, `qx`,
//!   `qy`, `qz`, case-insensitive) with the timestamp already in seconds.
//!
//! A file without a header is accepted when its rows are numeric with at
//! least nine columns, interpreted positionally as the generic layout.
//!
//! Loading is read-only and side-effect free; it is safe to call
//! repeatedly and concurrently.

use super::ReplayError;
use emtrack_core::{LoadError, Pose, Recording, Sample, POSE_ARITY};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Timestamp unit of the resolved timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampUnit {
    Millis,
    Seconds,
}

/// Resolved column layout for one file
#[derive(Debug, Clone)]
struct ColumnMap {
    sensor: usize,
    timestamp: usize,
    pose: [usize; POSE_ARITY],
    unit: TimestampUnit,
}

impl ColumnMap {
    /// Columns of the original tracker export, in pose wire order
    const TRACKER_POSE: [&'static str; POSE_ARITY] =
        ["X1 (M)", "Y1", "Z1", "Qw1", "Qx1", "Qy1", "Qz1"];

    /// Generic column names, in pose wire order
    const GENERIC_POSE: [&'static str; POSE_ARITY] = ["x", "y", "z", "qw", "qx", "qy", "qz"];

    fn from_header(fields: &[&str]) -> Option<ColumnMap> {
        let find = |name: &str| {
            fields
                .iter()
                .position(|f| f.eq_ignore_ascii_case(name.trim()))
        };

        // Tracker export layout (timestamps in milliseconds)
        if let (Some(sensor), Some(timestamp)) = (find("SEU"), find("Frame")) {
            let mut pose = [0usize; POSE_ARITY];
            for (slot, name) in pose.iter_mut().zip(Self::TRACKER_POSE) {
                *slot = find(name)?;
            }
            return Some(ColumnMap {
                sensor,
                timestamp,
                pose,
                unit: TimestampUnit::Millis,
            });
        }

        // Generic layout (timestamps in seconds)
        if let (Some(sensor), Some(timestamp)) = (find("sensor"), find("timestamp")) {
            let mut pose = [0usize; POSE_ARITY];
            for (slot, name) in pose.iter_mut().zip(Self::GENERIC_POSE) {
                *slot = find(name)?;
            }
            return Some(ColumnMap {
                sensor,
                timestamp,
                pose,
                unit: TimestampUnit::Seconds,
            });
        }

        None
    }

    /// Positional fallback for headerless numeric files:
    /// `sensor, timestamp, x, y, z, qw, qx, qy, qz`
    fn positional() -> ColumnMap {
        ColumnMap {
            sensor: 0,
            timestamp: 1,
            pose: [2, 3, 4, 5, 6, 7, 8],
            unit: TimestampUnit::Seconds,
        }
    }

    /// Highest column index this map reads, for arity checks
    fn max_index(&self) -> usize {
        self.pose
            .iter()
            .copied()
            .chain([self.sensor, self.timestamp])
            .max()
            .unwrap_or(0)
    }
}

/// Load a recording from a CSV file.
///
/// Fails with [`LoadError::MalformedRecord`] if any row cannot be parsed
/// into a valid sample and [`LoadError::EmptyRecording`] if the file
/// yields zero samples; in both cases replay never starts.
pub fn load(path: &Path) -> Result<Recording, ReplayError> {
    let file = File::open(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut recording = Recording::new();
    let mut map: Option<ColumnMap> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if map.is_none() {
            // First non-empty line: header, or data if headerless
            if let Some(resolved) = ColumnMap::from_header(&fields) {
                debug!("Resolved {:?} column layout from header", resolved.unit);
                map = Some(resolved);
                continue;
            }
            if fields.len() >= 2 + POSE_ARITY && fields[0].parse::<f64>().is_ok() {
                debug!("No header recognized, using positional column layout");
                map = Some(ColumnMap::positional());
            } else {
                return Err(LoadError::malformed(
                    line_no,
                    "unrecognized header (need tracker or generic column names)",
                )
                .into());
            }
        }

        if let Some(layout) = &map {
            recording.push(parse_row(layout, &fields, line_no)?);
        }
    }

    if recording.is_empty() {
        return Err(LoadError::EmptyRecording.into());
    }

    recording.finalize();
    debug!(
        "Loaded {} samples from {} sensors, duration {:.3}s",
        recording.total_samples(),
        recording.sensor_count(),
        recording.duration()
    );
    Ok(recording)
}

fn parse_row(map: &ColumnMap, fields: &[&str], line_no: usize) -> Result<Sample, LoadError> {
    if fields.len() <= map.max_index() {
        return Err(LoadError::malformed(
            line_no,
            format!(
                "too few columns: expected at least {}, got {}",
                map.max_index() + 1,
                fields.len()
            ),
        ));
    }

    // Sensor ids are exported as floats ("1.0"); accept only whole,
    // non-negative values
    let raw_sensor = fields[map.sensor];
    let sensor = raw_sensor
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u32)
        .ok_or_else(|| {
            LoadError::malformed(line_no, format!("invalid sensor index '{}'", raw_sensor))
        })?;

    let raw_ts = fields[map.timestamp];
    let mut timestamp = raw_ts
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            LoadError::malformed(line_no, format!("non-numeric timestamp '{}'", raw_ts))
        })?;
    if map.unit == TimestampUnit::Millis {
        timestamp /= 1000.0;
    }

    let mut pose = [0f32; POSE_ARITY];
    for (slot, &col) in pose.iter_mut().zip(map.pose.iter()) {
        let raw = fields[col];
        *slot = raw.parse::<f32>().map_err(|_| {
            LoadError::malformed(line_no, format!("non-numeric pose field '{}'", raw))
        })?;
    }

    Ok(Sample::new(sensor, timestamp, Pose::from_array(pose)))
}

/// Write the built-in demo recording used by the default interactive mode:
/// three sensors, interleaved, a bit over one second of data.
pub fn write_demo_csv(path: &Path) -> Result<(), ReplayError> {
    let io_err = |source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).map_err(io_err)?;
    writeln!(
        file,
        "SEU,FrErr,Frame,Sensor1,btn0_1,btn1_1,d1,aux(hex)_1,X1 (M),Y1,Z1,Qw1,Qx1,Qy1,Qz1"
    )
    .map_err(io_err)?;

    // sensor, time_ms, x, y, z, qw, qx, qy, qz
    let rows: &[(u32, u64, [f32; POSE_ARITY])] = &[
        (0, 0, [0.10, 0.20, 0.30, 1.00, 0.00, 0.00, 0.00]),
        (1, 40, [0.40, 0.50, 0.60, 0.90, 0.10, 0.00, 0.00]),
        (2, 80, [0.70, 0.80, 0.90, 0.70, 0.30, 0.20, 0.10]),
        (0, 120, [0.11, 0.22, 0.33, 0.99, 0.05, 0.00, 0.00]),
        (1, 160, [0.41, 0.52, 0.63, 0.89, 0.12, 0.01, 0.00]),
        (2, 200, [0.71, 0.82, 0.93, 0.69, 0.31, 0.21, 0.11]),
        (0, 400, [0.12, 0.24, 0.36, 0.98, 0.08, 0.01, 0.00]),
        (1, 440, [0.42, 0.54, 0.66, 0.88, 0.14, 0.02, 0.00]),
        (2, 480, [0.72, 0.84, 0.96, 0.68, 0.32, 0.22, 0.12]),
        (0, 800, [0.13, 0.26, 0.39, 0.97, 0.10, 0.02, 0.01]),
        (1, 900, [0.43, 0.56, 0.69, 0.87, 0.16, 0.03, 0.01]),
        (2, 1000, [0.73, 0.86, 0.99, 0.67, 0.33, 0.23, 0.13]),
    ];

    for (sensor, time_ms, pose) in rows {
        writeln!(
            file,
            "{}.0,0,{},1,0,0,0,0x0,{},{},{},{},{},{},{}",
            sensor, time_ms, pose[0], pose[1], pose[2], pose[3], pose[4], pose[5], pose[6]
        )
        .map_err(io_err)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_generic_header() {
        let file = write_file(
            "sensor,timestamp,x,y,z,qw,qx,qy,qz\n\
             0,0.0,0.1,0.2,0.3,1,0,0,0\n\
             1,0.1,0.4,0.5,0.6,1,0,0,0\n\
             0,0.5,0.1,0.2,0.3,1,0,0,0\n",
        );
        let recording = load(file.path()).unwrap();
        assert_eq!(recording.sensor_count(), 2);
        assert_eq!(recording.total_samples(), 3);
        assert_eq!(recording.duration(), 0.5);
    }

    #[test]
    fn test_load_tracker_header_normalizes_millis() {
        let file = write_file(
            "SEU,FrErr,Frame,Sensor1,btn0_1,btn1_1,d1,aux(hex)_1,X1 (M),Y1,Z1,Qw1,Qx1,Qy1,Qz1\n\
             1.0,0,100,1,0,0,0,0x0,0.1,0.2,0.3,1.0,0.0,0.0,0.0\n\
             2.0,0,220,2,0,0,0,0x0,0.4,0.5,0.6,0.9,0.1,0.0,0.0\n",
        );
        let recording = load(file.path()).unwrap();
        assert_eq!(recording.sensor_count(), 2);
        let s1 = recording.stream(1).unwrap().iter().next().unwrap();
        assert!((s1.timestamp - 0.1).abs() < 1e-9);
        assert!((s1.pose.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_load_headerless_positional() {
        let file = write_file(
            "0,0.0,0.1,0.2,0.3,1,0,0,0\n\
             1,0.25,0.4,0.5,0.6,1,0,0,0\n",
        );
        let recording = load(file.path()).unwrap();
        assert_eq!(recording.total_samples(), 2);
        assert_eq!(recording.duration(), 0.25);
    }

    #[test]
    fn test_out_of_order_rows_sorted_on_load() {
        let file = write_file(
            "sensor,timestamp,x,y,z,qw,qx,qy,qz\n\
             0,0.9,0,0,0,1,0,0,0\n\
             0,0.1,0,0,0,1,0,0,0\n\
             0,0.5,0,0,0,1,0,0,0\n",
        );
        let recording = load(file.path()).unwrap();
        assert!(recording.stream(0).unwrap().is_sorted());
    }

    #[test]
    fn test_malformed_timestamp_fails_load() {
        let file = write_file(
            "sensor,timestamp,x,y,z,qw,qx,qy,qz\n\
             0,0.0,0.1,0.2,0.3,1,0,0,0\n\
             0,abc,0.1,0.2,0.3,1,0,0,0\n",
        );
        let err = load(file.path()).unwrap_err();
        match err {
            ReplayError::Load(LoadError::MalformedRecord { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("abc"), "reason was: {}", reason);
            }
            other => panic!("expected MalformedRecord, got: {}", other),
        }
    }

    #[test]
    fn test_wrong_arity_fails_load() {
        let file = write_file(
            "sensor,timestamp,x,y,z,qw,qx,qy,qz\n\
             0,0.0,0.1,0.2\n",
        );
        let err = load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Load(LoadError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_fractional_sensor_index_fails_load() {
        let file = write_file(
            "sensor,timestamp,x,y,z,qw,qx,qy,qz\n\
             1.5,0.0,0.1,0.2,0.3,1,0,0,0\n",
        );
        assert!(matches!(
            load(file.path()).unwrap_err(),
            ReplayError::Load(LoadError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let file = write_file("sensor,timestamp,x,y,z,qw,qx,qy,qz\n");
        assert!(matches!(
            load(file.path()).unwrap_err(),
            ReplayError::Load(LoadError::EmptyRecording)
        ));
    }

    #[test]
    fn test_zero_byte_file_is_empty() {
        let file = write_file("");
        assert!(matches!(
            load(file.path()).unwrap_err(),
            ReplayError::Load(LoadError::EmptyRecording)
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/recording.csv")).unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
    }

    #[test]
    fn test_demo_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.csv");
        write_demo_csv(&path).unwrap();

        let recording = load(&path).unwrap();
        assert_eq!(recording.sensor_count(), 3);
        assert_eq!(recording.total_samples(), 12);
        assert!((recording.duration() - 1.0).abs() < 1e-9);
    }
}
