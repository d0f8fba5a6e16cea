use std::time::Duration;

/// Running performance counters, accumulated only while explicitly started
/// on a connection and cleared when stopped.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub read_time: Duration,
    pub read_rows: u64,
    pub read_chunks: u64,
    pub insert_time: Duration,
    pub insert_rows: u64,
    pub insert_calls: u64,
    pub update_time: Duration,
    pub update_rows: u64,
    pub update_calls: u64,
}

impl PerformanceMetrics {
    pub fn record_read(&mut self, elapsed: Duration, rows: u64) {
        self.read_time += elapsed;
        self.read_rows += rows;
        self.read_chunks += 1;
    }

    pub fn record_insert(&mut self, elapsed: Duration, rows: u64) {
        self.insert_time += elapsed;
        self.insert_rows += rows;
        self.insert_calls += 1;
    }

    pub fn record_update(&mut self, elapsed: Duration, rows: u64) {
        self.update_time += elapsed;
        self.update_rows += rows;
        self.update_calls += 1;
    }
}

impl std::fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {} rows / {} chunks in {:?}, inserted {} rows in {:?}, updated {} rows in {:?}",
            self.read_rows,
            self.read_chunks,
            self.read_time,
            self.insert_rows,
            self.insert_time,
            self.update_rows,
            self.update_time
        )
    }
}
