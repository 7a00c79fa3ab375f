use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use log::Level;

/// Reports training progress through the `log` facade instead of a terminal dashboard.
///
/// Every iteration is logged at debug level; the metrics of the last iteration of an
/// epoch are logged at info level.
pub struct LogRenderer {
    stage: &'static str,
    train_metrics: Vec<String>,
    valid_metrics: Vec<String>,
}

impl LogRenderer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            train_metrics: Vec::new(),
            valid_metrics: Vec::new(),
        }
    }

    fn record(metrics: &mut Vec<String>, state: MetricState) {
        let line = match state {
            MetricState::Generic(entry) => format!("{}: {}", entry.name, entry.formatted),
            MetricState::Numeric(entry, _) => format!("{}: {}", entry.name, entry.formatted),
        };
        metrics.push(line);
    }

    /// Epoch summaries are info, intermediate iterations are debug.
    fn message(&self, split: &str, metrics: &[String], item: &TrainingProgress) -> (Level, String) {
        let summary = metrics.join(", ");
        let progress = &item.progress;

        if progress.items_total > 0 && progress.items_processed >= progress.items_total {
            let message = format!(
                "[{}] {split} epoch {}/{} - {summary}",
                self.stage, item.epoch, item.epoch_total,
            );
            (Level::Info, message)
        } else {
            let message = format!(
                "[{}] {split} epoch {}/{} iteration {} ({}/{}) - {summary}",
                self.stage,
                item.epoch,
                item.epoch_total,
                item.iteration,
                progress.items_processed,
                progress.items_total,
            );
            (Level::Debug, message)
        }
    }

    fn render(&self, split: &str, metrics: &[String], item: &TrainingProgress) {
        let (level, message) = self.message(split, metrics, item);
        log::log!(level, "{message}");
    }
}

impl MetricsRenderer for LogRenderer {
    fn update_train(&mut self, state: MetricState) {
        Self::record(&mut self.train_metrics, state);
    }

    fn update_valid(&mut self, state: MetricState) {
        Self::record(&mut self.valid_metrics, state);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        self.render("train", &self.train_metrics, &item);
        self.train_metrics.clear();
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        self.render("valid", &self.valid_metrics, &item);
        self.valid_metrics.clear();
    }
}
