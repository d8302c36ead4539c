use parking_lot::Mutex;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;

/// Rotation threshold for the request log.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

static REQUEST_LOG: LazyLock<RequestLog> =
    LazyLock::new(|| RequestLog::new(Config::dir().join("proxy.log")));

pub fn request_log() -> &'static RequestLog {
    &REQUEST_LOG
}

/// Append-only request log with size-based rotation.
///
/// When an append pushes the file past 10 MiB, the file is rotated to
/// `<path>.1` (single generation kept) and subsequent writes start fresh.
pub struct RequestLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RequestLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record; every record carries the request id.
    pub fn append(&self, request_id: &str, message: &str) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let line = format!("{ts} [{request_id}] {message}\n");

        let _guard = self.lock.lock();

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);

        let Ok(mut file) = file else {
            return;
        };

        if file.write_all(line.as_bytes()).is_err() {
            return;
        }

        if let Ok(meta) = file.metadata()
            && meta.len() > MAX_LOG_SIZE
        {
            drop(file);
            let rotated = rotated_path(&self.path);
            let _ = std::fs::remove_file(&rotated);
            let _ = std::fs::rename(&self.path, &rotated);
        }
    }
}

fn rotated_path(path: &std::path::Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".1");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vproxy-log-tests");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(rotated_path(&path));
        path
    }

    #[test]
    fn test_append_carries_request_id() {
        let path = temp_log("basic.log");
        let log = RequestLog::new(path.clone());
        log.append("req_0001", "Request received");
        log.append("req_0001", "Request completed status=200");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("[req_0001]")));
    }

    #[test]
    fn test_rotation_past_threshold() {
        let path = temp_log("rotate.log");
        let log = RequestLog::new(path.clone());

        // Seed the file just under the threshold, then push it over.
        {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap();
            let filler = vec![b'x'; (MAX_LOG_SIZE - 10) as usize];
            file.write_all(&filler).unwrap();
        }
        log.append("req_a", "line that crosses the threshold");

        let rotated = rotated_path(&path);
        assert!(rotated.exists(), "old file should exist as <path>.1");
        assert!(!path.exists(), "fresh file not yet created");

        // Subsequent writes land in a new file.
        log.append("req_b", "first line of the new file");
        let fresh = std::fs::read_to_string(&path).unwrap();
        assert!(fresh.contains("[req_b]"));
        assert!(std::fs::metadata(&rotated).unwrap().len() > MAX_LOG_SIZE - 10);
    }

    #[test]
    fn test_single_rotation_generation() {
        let path = temp_log("single-gen.log");
        let rotated = rotated_path(&path);
        std::fs::write(&rotated, "previous generation").unwrap();

        // A rotation replaces the old .1 rather than stacking generations.
        {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap();
            file.write_all(&vec![b'y'; (MAX_LOG_SIZE + 1) as usize])
                .unwrap();
        }
        let log = RequestLog::new(path.clone());
        log.append("req_c", "trigger");

        let content = std::fs::read_to_string(&rotated).unwrap();
        assert!(!content.contains("previous generation"));
    }
}
