use log::info;

/// Console-facing progress reporting, purely observational.
pub trait ProgressSink {
    fn start(&mut self, label: &str, total: usize);
    fn update(&mut self, done: usize);
    fn finish(&mut self);
}

/// Sink that ignores all progress
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn start(&mut self, _label: &str, _total: usize) {}
    fn update(&mut self, _done: usize) {}
    fn finish(&mut self) {}
}

/// Reports progress through `log::info!` every `step_percent` percent
#[derive(Clone, Debug)]
pub struct LogProgress {
    label: String,
    total: usize,
    step_percent: usize,
    last_reported: Option<usize>,
}

impl LogProgress {
    pub fn new(step_percent: usize) -> Self {
        LogProgress {
            label: String::new(),
            total: 0,
            step_percent: step_percent.clamp(1, 100),
            last_reported: None,
        }
    }

    fn bucket(&self, done: usize) -> usize {
        if self.total == 0 {
            return 100;
        }
        let percent = done.min(self.total) * 100 / self.total;
        percent / self.step_percent * self.step_percent
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        LogProgress::new(10)
    }
}

impl ProgressSink for LogProgress {
    fn start(&mut self, label: &str, total: usize) {
        self.label = label.to_string();
        self.total = total;
        self.last_reported = None;
        info!("{}: starting ({} steps)", self.label, total);
    }

    fn update(&mut self, done: usize) {
        let bucket = self.bucket(done);
        if self.last_reported.map_or(true, |last| bucket > last) {
            self.last_reported = Some(bucket);
            info!("{}: {} of {} ({}%)", self.label, done.min(self.total), self.total, bucket);
        }
    }

    fn finish(&mut self) {
        info!("{}: done", self.label);
    }
}
