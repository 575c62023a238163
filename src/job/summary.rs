//! Final human-readable run summary.

use std::path::Path;
use std::time::Duration;

use crate::fsio;
use crate::progress::ProgressState;

/// Renders the run summary text.
#[must_use]
pub fn render_summary(state: &ProgressState, elapsed: Duration) -> String {
    let mut out = String::new();
    out.push_str("skillshelf run summary\n");
    out.push_str("======================\n\n");
    out.push_str(&format!("session:          {}\n", state.session_id));
    out.push_str(&format!("status:           {:?}\n", state.status));
    out.push_str(&format!(
        "skills:           {}/{}\n",
        state.completed_skills, state.total_skills
    ));
    out.push_str(&format!(
        "books:            {}/{}\n",
        state.completed_books, state.total_books
    ));
    out.push_str(&format!("failed items:     {}\n", state.failed_items.len()));
    out.push_str(&format!("elapsed:          {}\n", format_duration(elapsed)));

    if !state.failed_items.is_empty() {
        out.push_str("\nfailed items\n------------\n");
        for (id, item) in &state.failed_items {
            out.push_str(&format!("{id}  [{}]  {}\n", item.kind, item.message));
        }
    }
    out
}

/// Writes the summary next to the progress file.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_summary(
    path: &Path,
    state: &ProgressState,
    elapsed: Duration,
) -> std::io::Result<()> {
    fsio::write_atomic(path, render_summary(state, elapsed).as_bytes())
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
