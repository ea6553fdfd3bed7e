use tracing::info;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub url: String,
    pub bytes_read: u64,
    pub expected_size: Option<u64>,
    pub completed: bool,
}

impl ProgressEvent {
    pub fn percent(&self) -> Option<f64> {
        if self.completed {
            return Some(100.0);
        }
        let expected = self.expected_size.filter(|size| *size > 0)?;
        let percent = self.bytes_read as f64 / expected as f64 * 100.0;
        Some(percent.min(99.99))
    }

    pub fn message(&self) -> String {
        if self.completed {
            return format!("Download complete. {} bytes read.", self.bytes_read);
        }
        match (self.percent(), self.expected_size) {
            (Some(percent), Some(expected)) => format!(
                "{percent:.2}% downloaded. {} of {expected} bytes.",
                self.bytes_read
            ),
            _ => format!("downloading: {} bytes so far...", self.bytes_read),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        info!(url = %event.url, "{}", event.message());
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped_until_complete() {
        let mut event = ProgressEvent {
            url: "u".to_string(),
            bytes_read: 150,
            expected_size: Some(100),
            completed: false,
        };
        assert_eq!(event.percent(), Some(99.99));
        event.completed = true;
        assert_eq!(event.percent(), Some(100.0));
        event.expected_size = None;
        event.completed = false;
        assert!(event.message().contains("150 bytes so far"));
    }
}
