use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{msg} [{elapsed_precise}] {bar:40} {pos}/{len} particles (ETA {eta})";

/// Particle counter shared between simulation threads
pub(crate) struct SimulationProgress {
    bar: ProgressBar,
}

impl SimulationProgress {
    pub(crate) fn new(total: usize, show: bool) -> Self {
        if !show {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style);
        }
        bar.set_message("Simulating");
        Self { bar }
    }

    #[inline(always)]
    pub(crate) fn inc(&self) {
        self.bar.inc(1);
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
