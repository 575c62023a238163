//! Job controller: orchestrates discovery, the per-book pipeline, resume,
//! interruption and exit-code mapping.

pub mod summary;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::book::{AssetDownloader, BookError, BookFetcher};
use crate::config::{Config, ConfigError};
use crate::discovery::{
    BookRef, DiscoveryEngine, ManifestError, Topic, TopicManifest, make_dialect, order_topics,
};
use crate::epub;
use crate::naming;
use crate::pacing::{Pacer, RequestClass, effective_concurrency};
use crate::progress::{ProgressError, ProgressTracker};
use crate::session::{RotatingJar, SessionClient, SessionError};

/// Process exit outcomes and their contract codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    AuthFailure,
    ConfigError,
    Partial,
    Interrupted,
}

impl ProcessExit {
    /// The numeric exit code for this outcome.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::AuthFailure => 1,
            Self::ConfigError => 2,
            Self::Partial => 3,
            Self::Interrupted => 130,
        }
    }
}

/// Errors fatal to the whole job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The session is deauthenticated; the message is actionable.
    #[error("{0}")]
    Auth(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Cookie persistence or other session-state failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The HTTP client itself could not be constructed.
    #[error("cannot build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl JobError {
    /// Maps a fatal job error to its exit outcome.
    #[must_use]
    pub fn exit(&self) -> ProcessExit {
        match self {
            Self::Auth(_) => ProcessExit::AuthFailure,
            _ => ProcessExit::ConfigError,
        }
    }
}

/// Single-pipeline job controller.
///
/// One session, one cookie jar, strictly serial book processing. The
/// interrupt flag is polled at page and book boundaries: an interrupt
/// finishes the in-flight request, flushes progress and cookies, and exits
/// with status `paused`.
pub struct JobController {
    config: Config,
    session: Arc<SessionClient>,
    pacer: Arc<Pacer>,
    progress: ProgressTracker,
    interrupted: Arc<AtomicBool>,
    spinner: ProgressBar,
}

impl JobController {
    /// Builds a controller from configuration and an initial cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] for invalid configuration,
    /// [`JobError::Progress`] for an unreadable or newer-schema progress
    /// file, and [`JobError::Client`] when the HTTP client cannot build.
    pub fn new(
        config: Config,
        jar: Arc<RotatingJar>,
        cookie_path: Option<std::path::PathBuf>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let _ = effective_concurrency(config.concurrency);

        let session = Arc::new(
            SessionClient::new(jar, cookie_path, config.token_save_interval)
                .map_err(JobError::Client)?,
        );
        let pacer = Arc::new(Pacer::new(
            config.discovery_delay(),
            config.download_delay(),
            config.session_reuse_delay(),
        ));
        let progress = if config.resume {
            ProgressTracker::load_or_new(config.progress_file.clone())?
        } else {
            ProgressTracker::new(config.progress_file.clone())
        };

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));

        Ok(Self {
            config,
            session,
            pacer,
            progress,
            interrupted: Arc::new(AtomicBool::new(false)),
            spinner,
        })
    }

    /// The flag a SIGINT handler should set to request a graceful pause.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Read access to the progress tracker (for reporting).
    #[must_use]
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Discover-only mode: enumerate topics (smallest expected count
    /// first), write one manifest per topic, checkpoint as we go.
    ///
    /// # Errors
    ///
    /// [`JobError::Auth`] aborts on deauthentication; persistence
    /// failures for manifests or progress are fatal.
    pub async fn run_discovery(&mut self, mut topics: Vec<Topic>) -> Result<ProcessExit, JobError> {
        order_topics(&mut topics);
        self.progress.set_totals(topics.len() as u64, 0);

        let dialect = make_dialect(self.config.discovery_api_version, &self.config.base_url)
            .map_err(JobError::Client)?;
        let engine = DiscoveryEngine::new(
            Arc::clone(&self.session),
            dialect,
            Arc::clone(&self.pacer),
            self.config.max_books_per_skill,
            self.config.max_pages_per_skill,
        );

        for topic in &topics {
            if self.interrupted.load(Ordering::SeqCst) {
                return self.pause();
            }
            self.progress.begin(format!("discovering {}", topic.name));
            self.spinner.set_message(format!("discover: {}", topic.name));

            match engine.discover_topic(topic).await {
                Ok(outcome) => {
                    let path = outcome
                        .manifest
                        .write_to_dir(&self.config.book_ids_directory)?;
                    info!(
                        topic = %topic.name,
                        books = outcome.manifest.total_books,
                        path = %path.display(),
                        "discover: manifest written"
                    );
                    self.progress.skill_completed()?;
                }
                Err(e) if e.is_auth() => return self.abort_auth(&e.to_string()),
                Err(e) => {
                    warn!(topic = %topic.name, error = %e, "fail: topic discovery failed");
                    self.progress
                        .record_failure(&topic.name, e.kind(), &e.to_string());
                    self.progress.save()?;
                }
            }
        }

        self.finish()
    }

    /// Download mode: walk topic manifests smallest-first, apply the
    /// existence-based skip, run the per-book pipeline, checkpoint at book
    /// boundaries.
    ///
    /// # Errors
    ///
    /// [`JobError::Auth`] aborts on deauthentication; progress or cookie
    /// write failures are fatal.
    pub async fn run_download(&mut self) -> Result<ProcessExit, JobError> {
        let manifests = TopicManifest::load_dir(&self.config.book_ids_directory)?;
        let total_books: u64 = manifests.iter().map(|m| m.total_books).sum();
        self.progress
            .set_totals(manifests.len() as u64, total_books);

        let fetcher = BookFetcher::new(Arc::clone(&self.session), &self.config.base_url);
        let assets = AssetDownloader::new(Arc::clone(&self.session));

        for manifest in &manifests {
            let topic_dir = self
                .config
                .base_directory
                .join(naming::topic_folder_name(&manifest.skill_name));

            for book in &manifest.books {
                if self.interrupted.load(Ordering::SeqCst) {
                    return self.pause();
                }

                let book_dir = topic_dir.join(naming::book_folder_name(&book.title, &book.id));
                if !self.config.force_redownload
                    && naming::book_is_present(&book_dir, self.config.epub_format)
                {
                    info!(book = %book.id, title = %book.title, "skip: already on disk");
                    self.progress.book_completed()?;
                    continue;
                }

                self.progress
                    .begin(format!("downloading {}", book.title));
                self.set_book_message(&book.title);

                self.pacer.wait(RequestClass::Download).await;
                self.pacer.wait_session_reuse().await;

                match self
                    .process_book(&fetcher, &assets, book, &book_dir)
                    .await
                {
                    Ok(()) => {
                        info!(book = %book.id, title = %book.title, "download: book complete");
                        self.progress.book_completed()?;
                        self.session.book_completed()?;
                    }
                    Err(e) if e.is_auth() => return self.abort_auth(&e.to_string()),
                    Err(e) => {
                        warn!(book = %book.id, error = %e, "fail: book failed; continuing");
                        self.progress.record_failure(&book.id, e.kind(), &e.to_string());
                        self.progress.save()?;
                    }
                }
                self.pacer.touch_session().await;
            }

            self.progress.skill_completed()?;
        }

        self.finish()
    }

    async fn process_book(
        &self,
        fetcher: &BookFetcher,
        assets: &AssetDownloader,
        book: &BookRef,
        book_dir: &Path,
    ) -> Result<(), BookError> {
        let fetched = fetcher.fetch_book(book).await?;
        epub::stage_book(book_dir, &fetched)?;

        let oebps = book_dir.join(epub::OEBPS_DIR);
        let report = assets.download_all(&fetched.assets, &oebps).await?;
        if !report.failed.is_empty() {
            warn!(
                book = %book.id,
                missing = report.failed.len(),
                "fail: some assets are missing; the book still builds"
            );
        }

        let package = epub::collect_package(book_dir, &fetched)?;
        for profile in self.config.epub_format.profiles() {
            let path = epub::build_epub(book_dir, &package, *profile)?;
            epub::structural_check(&path)?;
        }
        Ok(())
    }

    fn set_book_message(&self, title: &str) {
        let eta = self
            .progress
            .eta()
            .map_or_else(|| "eta unknown".to_string(), |eta| {
                format!("eta {}m", eta.as_secs() / 60)
            });
        let state = self.progress.state();
        self.spinner.set_message(format!(
            "download: [{}/{}] {title} ({eta})",
            state.completed_books, state.total_books
        ));
    }

    fn pause(&mut self) -> Result<ProcessExit, JobError> {
        warn!("interrupt received; flushing state and pausing");
        self.progress.pause()?;
        self.session.flush_cookies()?;
        self.spinner.finish_and_clear();
        self.write_summary();
        Ok(ProcessExit::Interrupted)
    }

    fn abort_auth(&mut self, message: &str) -> Result<ProcessExit, JobError> {
        error!("{message}");
        self.progress.fail()?;
        let _ = self.session.flush_cookies();
        self.spinner.finish_and_clear();
        self.write_summary();
        Err(JobError::Auth(message.to_string()))
    }

    fn finish(&mut self) -> Result<ProcessExit, JobError> {
        self.progress.complete()?;
        self.session.flush_cookies()?;
        self.spinner.finish_and_clear();
        self.write_summary();

        let failed = self.progress.failed_count();
        if failed > 0 {
            warn!(failed, "run finished with failures");
            Ok(ProcessExit::Partial)
        } else {
            info!("run finished cleanly");
            Ok(ProcessExit::Success)
        }
    }

    fn write_summary(&self) {
        let path = self
            .config
            .progress_file
            .with_file_name("skillshelf_summary.txt");
        if let Err(e) =
            summary::write_summary(&path, self.progress.state(), self.progress.elapsed())
        {
            warn!(error = %e, "cannot write run summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_match_contract() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::AuthFailure.code(), 1);
        assert_eq!(ProcessExit::ConfigError.code(), 2);
        assert_eq!(ProcessExit::Partial.code(), 3);
        assert_eq!(ProcessExit::Interrupted.code(), 130);
    }

    #[test]
    fn test_job_error_exit_mapping() {
        assert_eq!(
            JobError::Auth("expired".to_string()).exit(),
            ProcessExit::AuthFailure
        );
        let config_err = JobError::Config(ConfigError::Invalid {
            field: "concurrency",
            detail: "must be at least 1".to_string(),
        });
        assert_eq!(config_err.exit(), ProcessExit::ConfigError);
    }
}
