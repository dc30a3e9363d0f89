use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use splat_vfs::Progress;

/// Byte-level read progress rendered with indicatif. Quiet mode swaps in
/// hidden bars so the plumbing stays identical.
#[derive(Clone)]
pub struct ReadUi {
    multi: MultiProgress,
    quiet: bool,
}

impl ReadUi {
    pub fn new(multi: MultiProgress, quiet: bool) -> Self {
        Self { multi, quiet }
    }

    /// A progress callback for one input; drives a bar from the (done,
    /// total) ticks of the streaming layer.
    pub fn reader_progress(&self, name: &str) -> (ProgressBar, Progress) {
        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            self.multi.add(
                ProgressBar::no_length().with_style(
                    ProgressStyle::with_template(
                        "{spinner:.blue} {msg} {bytes}/{total_bytes} ({bytes_per_sec})",
                    )
                    .expect("Invalid indicatif config"),
                ),
            )
        };
        bar.set_message(name.to_owned());

        let callback_bar = bar.clone();
        let progress: Progress = Arc::new(move |done, total| {
            if let Some(total) = total {
                callback_bar.set_length(total);
            }
            callback_bar.set_position(done);
        });
        (bar, progress)
    }
}
