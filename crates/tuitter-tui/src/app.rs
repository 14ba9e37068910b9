use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tuitter_core::auth::{
    restore_at_startup, AuthFlowCoordinator, Authenticator, FallbackStore, FileStore, FlowError,
    KeyringStore, LoginError, LoginResult, RestoreBudget,
};
use tuitter_core::models::{Post, User};
use tuitter_core::{ApiError, Config, SessionClient};

use crate::auth_command::CommandAuthenticator;

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the background task channel
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Posts requested per feed load
pub const FEED_PAGE_SIZE: u32 = 50;

/// Longest post the compose box accepts
pub const MAX_POST_LENGTH: usize = 280;

/// Rows moved by PageUp/PageDown
pub const PAGE_SCROLL_SIZE: usize = 10;

// ============================================================================
// State Types
// ============================================================================

/// Which feed is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Timeline,
    Discover,
}

impl Feed {
    pub fn next(self) -> Self {
        match self {
            Feed::Timeline => Feed::Discover,
            Feed::Discover => Feed::Timeline,
        }
    }
}

/// Overall application state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Startup restore is running.
    Restoring,
    /// No session; the sign-in overlay is shown.
    SigningIn,
    Normal,
    Composing,
    ShowingHelp,
    ConfirmingQuit,
    Quitting,
}

// ============================================================================
// Background Task Results
// ============================================================================

/// Results sent from spawned tasks back to the UI loop.
enum BackgroundResult {
    Restored(bool),
    Profile(Result<User, ApiError>),
    Feed {
        feed: Feed,
        result: Result<Vec<Post>, ApiError>,
    },
    Posted(Result<Post, ApiError>),
    Liked {
        post_id: String,
        result: Result<(), ApiError>,
    },
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    pub config: Config,
    /// Where config changes are saved; `None` keeps them in memory.
    config_dir: Option<PathBuf>,
    client: SessionClient,
    login: Option<AuthFlowCoordinator>,
    login_rx: mpsc::Receiver<LoginResult>,
    background_tx: mpsc::Sender<BackgroundResult>,
    background_rx: mpsc::Receiver<BackgroundResult>,

    pub state: AppState,
    pub feed: Feed,
    pub posts: Vec<Post>,
    pub selection: usize,
    pub loading: bool,
    pub compose_text: String,
    pub status_message: Option<String>,
    pub login_error: Option<String>,
}

impl App {
    /// Create the app with the platform credential store.
    pub fn new(config: Config) -> Result<Self> {
        let config_dir = Config::config_dir()?;
        let store = Arc::new(FallbackStore::new(
            KeyringStore::new(),
            FileStore::new(&config_dir),
        ));
        let client = SessionClient::new(&config, store).context("Failed to create API client")?;

        let authenticator: Option<Arc<dyn Authenticator>> = match config.auth_command {
            Some(ref command) => Some(Arc::new(CommandAuthenticator::new(command.clone()))),
            None => {
                warn!("No sign-in helper configured");
                None
            }
        };
        Ok(Self::with_client(config, Some(config_dir), client, authenticator))
    }

    pub fn with_client(
        config: Config,
        config_dir: Option<PathBuf>,
        client: SessionClient,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let (login_tx, login_rx) = AuthFlowCoordinator::channel();
        let login = authenticator.map(|a| AuthFlowCoordinator::new(client.clone(), a, login_tx));
        let (background_tx, background_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        Self {
            config,
            config_dir,
            client,
            login,
            login_rx,
            background_tx,
            background_rx,

            state: AppState::Restoring,
            feed: Feed::Timeline,
            posts: Vec::new(),
            selection: 0,
            loading: false,
            compose_text: String::new(),
            status_message: None,
            login_error: None,
        }
    }

    /// Handle shown in the title bar.
    pub fn handle(&self) -> String {
        self.client.tokens().handle()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.tokens().is_authenticated()
    }

    pub fn login_in_progress(&self) -> bool {
        self.login.as_ref().is_some_and(|l| l.is_in_flight())
    }

    pub fn selected_post(&self) -> Option<&Post> {
        self.posts.get(self.selection)
    }

    // ===== Session =====

    /// Restore the persisted session off the UI loop.
    pub fn start_restore(&mut self) {
        self.state = AppState::Restoring;
        let client = self.client.clone();
        let budget = RestoreBudget::from_config(&self.config);
        let tx = self.background_tx.clone();

        tokio::spawn(async move {
            let restored = restore_at_startup(&client, budget).await;
            Self::send_result(&tx, BackgroundResult::Restored(restored)).await;
        });
    }

    /// Start the external sign-in flow.
    pub fn start_login(&mut self) {
        let Some(ref login) = self.login else {
            self.login_error =
                Some("No sign-in helper configured. Set TUITTER_AUTH_COMMAND.".to_string());
            return;
        };
        match login.start() {
            Ok(_) => {
                self.login_error = None;
                self.status_message = Some("Waiting for sign-in...".to_string());
            }
            Err(FlowError::AlreadyInProgress) => {
                self.status_message = Some("Sign-in already in progress".to_string());
            }
        }
    }

    pub fn sign_out(&mut self) {
        info!("Signing out");
        if let Err(e) = self.client.sign_out() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        self.posts.clear();
        self.selection = 0;
        self.config.last_handle = None;
        self.save_config();
        self.show_sign_in(None);
    }

    fn show_sign_in(&mut self, reason: Option<String>) {
        self.state = AppState::SigningIn;
        self.login_error = reason;
        self.status_message = None;
        self.loading = false;
    }

    fn enter_session(&mut self) {
        self.state = AppState::Normal;
        self.login_error = None;
        let handle = self.handle();
        self.status_message = Some(format!("Signed in as @{}", handle));
        self.config.last_handle = Some(handle);
        self.save_config();
        self.load_profile();
        self.refresh_feed();
    }

    fn load_profile(&self) {
        let client = self.client.clone();
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = client.current_user().await;
            Self::send_result(&tx, BackgroundResult::Profile(result)).await;
        });
    }

    fn save_config(&self) {
        let Some(ref dir) = self.config_dir else {
            return;
        };
        if let Err(e) = self.config.save_in(dir) {
            warn!(error = %e, "Failed to save config");
        }
    }

    // ===== Feed Actions =====

    pub fn switch_feed(&mut self, feed: Feed) {
        if self.feed != feed {
            self.feed = feed;
            self.posts.clear();
            self.selection = 0;
            self.refresh_feed();
        }
    }

    pub fn refresh_feed(&mut self) {
        let client = self.client.clone();
        let tx = self.background_tx.clone();
        let feed = self.feed;
        self.loading = true;

        tokio::spawn(async move {
            let result = match feed {
                Feed::Timeline => client.timeline(FEED_PAGE_SIZE).await,
                Feed::Discover => client.discover(FEED_PAGE_SIZE).await,
            };
            Self::send_result(&tx, BackgroundResult::Feed { feed, result }).await;
        });
    }

    pub fn like_selected(&mut self) {
        let Some(post) = self.selected_post() else {
            return;
        };
        if post.liked_by_user {
            self.status_message = Some("Already liked".to_string());
            return;
        }
        let post_id = post.id.clone();
        let client = self.client.clone();
        let tx = self.background_tx.clone();

        tokio::spawn(async move {
            let result = client.like_post(&post_id).await;
            Self::send_result(&tx, BackgroundResult::Liked { post_id, result }).await;
        });
    }

    pub fn start_compose(&mut self) {
        self.compose_text.clear();
        self.state = AppState::Composing;
    }

    pub fn submit_post(&mut self) {
        let content = self.compose_text.trim().to_string();
        if content.is_empty() {
            self.status_message = Some("Post is empty".to_string());
            return;
        }
        self.state = AppState::Normal;
        self.compose_text.clear();
        self.status_message = Some("Posting...".to_string());

        let client = self.client.clone();
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = client.create_post(&content).await;
            Self::send_result(&tx, BackgroundResult::Posted(result)).await;
        });
    }

    // ===== Selection =====

    pub fn select_next(&mut self, step: usize) {
        if !self.posts.is_empty() {
            self.selection = (self.selection + step).min(self.posts.len() - 1);
        }
    }

    pub fn select_prev(&mut self, step: usize) {
        self.selection = self.selection.saturating_sub(step);
    }

    // ===== Background Results =====

    /// Helper to send background results, logging any channel errors
    async fn send_result(tx: &mpsc::Sender<BackgroundResult>, result: BackgroundResult) {
        if let Err(e) = tx.send(result).await {
            error!(error = %e, "Failed to send background result - channel closed");
        }
    }

    /// Check for completed background tasks and process results
    pub fn check_background_tasks(&mut self) {
        while let Ok(result) = self.login_rx.try_recv() {
            self.process_login_result(result);
        }
        while let Ok(result) = self.background_rx.try_recv() {
            self.process_background_result(result);
        }
    }

    fn process_login_result(&mut self, result: LoginResult) {
        match result {
            LoginResult::Authenticated(credentials) => {
                info!(username = %credentials.username, "Sign-in complete");
                self.enter_session();
            }
            LoginResult::Failed(e) => {
                let message = match e {
                    LoginError::Authentication(reason) => reason,
                    LoginError::Unexpected => "Sign-in failed. Please try again.".to_string(),
                };
                self.show_sign_in(Some(message));
            }
        }
    }

    fn process_background_result(&mut self, result: BackgroundResult) {
        match result {
            BackgroundResult::Restored(true) => {
                info!("Session restored at startup");
                self.enter_session();
            }
            BackgroundResult::Restored(false) => {
                // A sign-in may have finished while restore was still retrying.
                if self.state == AppState::Restoring {
                    debug!("No session restored; showing sign-in");
                    self.show_sign_in(None);
                }
            }
            BackgroundResult::Profile(result) => match result {
                Ok(user) => {
                    if self.status_message.as_deref().is_some_and(|m| m.starts_with("Signed in")) {
                        self.status_message =
                            Some(format!("Signed in as {} (@{})", user.display_name(), user.handle));
                    }
                }
                // The feed load reports the same failure to the user.
                Err(e) => warn!(error = %e, "Failed to load profile"),
            },
            BackgroundResult::Feed { feed, result } => {
                if feed != self.feed {
                    return;
                }
                self.loading = false;
                match result {
                    Ok(posts) => {
                        debug!(count = posts.len(), ?feed, "Feed loaded");
                        self.posts = posts;
                        self.selection = self.selection.min(self.posts.len().saturating_sub(1));
                        if self.status_message.as_deref() == Some("Refreshing...") {
                            self.status_message = None;
                        }
                    }
                    Err(e) => self.handle_api_error(&e),
                }
            }
            BackgroundResult::Posted(result) => match result {
                Ok(post) => {
                    self.status_message = Some("Posted".to_string());
                    if self.feed == Feed::Timeline {
                        self.posts.insert(0, post);
                        self.selection = 0;
                    }
                }
                Err(e) => self.handle_api_error(&e),
            },
            BackgroundResult::Liked { post_id, result } => match result {
                Ok(()) => {
                    if let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) {
                        post.liked_by_user = true;
                        post.likes += 1;
                    }
                }
                Err(e) => self.handle_api_error(&e),
            },
        }
    }

    /// An auth failure here means restore already failed; only sign-in helps.
    fn handle_api_error(&mut self, e: &ApiError) {
        error!(error = %e, "Backend call failed");
        if e.is_auth_failure() {
            self.show_sign_in(Some("Session expired. Please sign in again.".to_string()));
            return;
        }
        let message = match e {
            ApiError::RateLimited => "Server is busy. Please wait a moment and try again.".to_string(),
            ApiError::Transport(_) => "Network error. Check your connection.".to_string(),
            ApiError::NotFound(_) => "That post no longer exists.".to_string(),
            ApiError::Decode { .. } => "Unexpected response from server.".to_string(),
            other => format!("Error: {}", other),
        };
        self.loading = false;
        self.status_message = Some(message);
    }
}

// ============================================================================
// Input Validation
// ============================================================================

fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if a character may be added to the compose box
pub fn can_add_post_char(current_len: usize, c: char) -> bool {
    current_len < MAX_POST_LENGTH && is_valid_input_char(c)
}

// ============================================================================
// Tests
// ============================================================================
