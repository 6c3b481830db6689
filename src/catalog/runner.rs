//! Event loop driving the catalog view.
//!
//! Uses `tokio::select!` to multiplex four sources:
//! - **Session state**: a transition to logged-out ends the loop
//! - **User commands**: keystrokes, filter changes, paging, mutations
//! - **Fetch completions**: results of spawned Local/External/mutation tasks
//! - **Debounce deadline**: releases the last typed search to the External source
//!
//! After every change that affects what is shown, a [`CatalogUpdate`] is
//! published on the update channel.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::debounce::SearchDebouncer;
use super::filter::{PageView, ViewMode};
use super::source::{CatalogSource, Mutation};
use super::state::{CatalogState, FetchOutcome};
use crate::api::{ApiError, ExternalMovie, LocalMovie, SessionState, WatchStatus};

/// Input from the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogCommand {
    /// The search box changed. Filters locally at once, searches externally after the debounce.
    Search(String),
    SetStatus(Option<WatchStatus>),
    SetGenre(Option<String>),
    SetView(ViewMode),
    GoToPage(usize),
    /// Refetch both sources.
    Refresh,
    Mutate(Mutation),
    Quit,
}

/// Completion of a spawned task.
#[derive(Debug)]
pub enum CatalogEvent {
    LocalFetched {
        generation: u64,
        result: Result<Vec<LocalMovie>, ApiError>,
    },
    ExternalFetched {
        generation: u64,
        result: Result<Vec<ExternalMovie>, ApiError>,
    },
    MutationFinished {
        mutation: Mutation,
        result: Result<(), ApiError>,
    },
}

/// What the rendering layer should show.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogUpdate {
    pub page: PageView,
    /// Both sources have resolved at least once.
    pub ready: bool,
    /// Size of the merged catalog before filtering.
    pub total_available: usize,
    /// Query of the latest External fetch.
    pub external_query: String,
    /// A typed search is waiting for the debounce interval.
    pub search_pending: bool,
    /// Status line for the last failure or completed mutation.
    pub message: Option<String>,
}

/// Why [`CatalogRunner::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Quit,
    CommandsClosed,
    /// The session was cleared; the caller should return to login.
    SessionLost,
}

pub struct CatalogRunner<S: CatalogSource> {
    source: S,
    state: CatalogState,
    debouncer: SearchDebouncer,
    event_tx: mpsc::Sender<CatalogEvent>,
    event_rx: mpsc::Receiver<CatalogEvent>,
    updates: mpsc::Sender<CatalogUpdate>,
    external_handle: Option<JoinHandle<()>>,
}

impl<S: CatalogSource> CatalogRunner<S> {
    pub fn new(
        source: S,
        state: CatalogState,
        debouncer: SearchDebouncer,
        updates: mpsc::Sender<CatalogUpdate>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            source,
            state,
            debouncer,
            event_tx,
            event_rx,
            updates,
            external_handle: None,
        }
    }

    /// Run until quit, command channel close, or session loss.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CatalogCommand>,
        mut session: watch::Receiver<SessionState>,
    ) -> RunExit {
        if is_logged_out(&session.borrow_and_update()) {
            return RunExit::SessionLost;
        }

        // Initial load: both sources concurrently, default external listing.
        self.fetch_local();
        self.fetch_external(String::new());
        self.publish(None).await;

        let mut session_open = true;
        let exit = loop {
            tokio::select! {
                biased;

                changed = session.changed(), if session_open => {
                    match changed {
                        Ok(()) => {
                            if is_logged_out(&session.borrow_and_update()) {
                                tracing::warn!("Session ended, stopping catalog");
                                break RunExit::SessionLost;
                            }
                        }
                        Err(_) => session_open = false,
                    }
                }

                command = commands.recv() => {
                    match command {
                        None => break RunExit::CommandsClosed,
                        Some(CatalogCommand::Quit) => break RunExit::Quit,
                        Some(command) => self.handle_command(command).await,
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }

                _ = self.debouncer.wait() => {
                    if let Some(query) = self.debouncer.poll(Instant::now()) {
                        tracing::debug!(query = %query, "Dispatching debounced search");
                        self.fetch_external(query);
                        self.publish(None).await;
                    }
                }
            }
        };

        if let Some(handle) = self.external_handle.take() {
            handle.abort();
        }
        exit
    }

    async fn handle_command(&mut self, command: CatalogCommand) {
        match command {
            CatalogCommand::Search(text) => {
                self.state.set_search_text(text.clone());
                self.debouncer.on_input(text, Instant::now());
                tracing::trace!(
                    delay_ms = self.debouncer.interval().as_millis() as u64,
                    "External search scheduled"
                );
            }
            CatalogCommand::SetStatus(status) => self.state.set_status(status),
            CatalogCommand::SetGenre(genre) => self.state.set_genre(genre),
            CatalogCommand::SetView(view) => self.state.set_view_mode(view),
            CatalogCommand::GoToPage(page) => {
                if !self.state.go_to_page(page) {
                    return;
                }
            }
            CatalogCommand::Refresh => self.refresh(),
            CatalogCommand::Mutate(mutation) => {
                self.spawn_mutation(mutation);
                return;
            }
            // Handled by the loop.
            CatalogCommand::Quit => return,
        }
        self.publish(None).await;
    }

    async fn handle_event(&mut self, event: CatalogEvent) {
        let message = match event {
            CatalogEvent::LocalFetched { generation, result } => {
                match self.state.complete_local_fetch(generation, result) {
                    FetchOutcome::Stale => return,
                    FetchOutcome::Applied { count } => {
                        tracing::debug!(count, generation, "Saved movies updated");
                        None
                    }
                    FetchOutcome::Failed(e) => Some(format!("Failed to load your movies: {e}")),
                }
            }
            CatalogEvent::ExternalFetched { generation, result } => {
                match self.state.complete_external_fetch(generation, result) {
                    FetchOutcome::Stale => return,
                    FetchOutcome::Applied { count } => {
                        tracing::debug!(count, generation, "External results updated");
                        None
                    }
                    FetchOutcome::Failed(e) => Some(format!("External search failed: {e}")),
                }
            }
            CatalogEvent::MutationFinished { mutation, result } => match result {
                Ok(()) => {
                    tracing::info!(mutation = %mutation, "Mutation applied");
                    self.refresh();
                    Some(format!("Done: {mutation}"))
                }
                Err(e) => {
                    tracing::warn!(mutation = %mutation, error = %e, "Mutation failed");
                    let reason = e.detail().map(str::to_owned).unwrap_or_else(|| e.to_string());
                    Some(format!("Could not {mutation}: {reason}"))
                }
            },
        };
        self.publish(message).await;
    }

    /// Refetch Local and re-run the current External search.
    fn refresh(&mut self) {
        self.fetch_local();
        let query = self.state.external_query().to_string();
        self.fetch_external(query);
    }

    fn fetch_local(&mut self) {
        let generation = self.state.begin_local_fetch();
        let fut = self.source.fetch_local();
        let tx = self.event_tx.clone();

        tracing::debug!(generation, "Spawning saved-movies fetch");
        tokio::spawn(async move {
            let result = fut.await;
            if let Err(e) = tx.send(CatalogEvent::LocalFetched { generation, result }).await {
                tracing::warn!(error = %e, "Failed to deliver saved movies (receiver dropped)");
            }
        });
    }

    fn fetch_external(&mut self, query: String) {
        // The generation check already discards a superseded result; aborting saves the request.
        if let Some(handle) = self.external_handle.take() {
            handle.abort();
            tracing::debug!("Aborted previous external search");
        }

        let generation = self.state.begin_external_fetch(&query);
        let fut = self.source.search_external(query.clone());
        let tx = self.event_tx.clone();

        tracing::debug!(query = %query, generation, "Spawning external search");
        self.external_handle = Some(tokio::spawn(async move {
            let result = fut.await;
            if let Err(e) = tx
                .send(CatalogEvent::ExternalFetched { generation, result })
                .await
            {
                tracing::warn!(error = %e, "Failed to deliver external results (receiver dropped)");
            }
        }));
    }

    fn spawn_mutation(&self, mutation: Mutation) {
        let fut = self.source.apply(mutation.clone());
        let tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = fut.await;
            if let Err(e) = tx
                .send(CatalogEvent::MutationFinished { mutation, result })
                .await
            {
                tracing::warn!(error = %e, "Failed to deliver mutation result (receiver dropped)");
            }
        });
    }

    async fn publish(&mut self, message: Option<String>) {
        let update = CatalogUpdate {
            page: self.state.visible(),
            ready: self.state.is_ready(),
            total_available: self.state.total_available(),
            external_query: self.state.external_query().to_string(),
            search_pending: self.debouncer.is_pending(),
            message,
        };
        if self.updates.send(update).await.is_err() {
            tracing::debug!("Update receiver dropped");
        }
    }
}

fn is_logged_out(state: &SessionState) -> bool {
    matches!(state, SessionState::LoggedOut { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WatchStatus;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeSource {
        local: Arc<Mutex<Vec<LocalMovie>>>,
        queries: Arc<Mutex<Vec<String>>>,
        local_fetches: Arc<Mutex<usize>>,
        mutations: Arc<Mutex<Vec<Mutation>>>,
    }

    fn external(external_id: &str, title: &str) -> ExternalMovie {
        ExternalMovie {
            external_id: external_id.into(),
            title: title.into(),
            genre: None,
            year: None,
            rating: None,
            plot: None,
            poster: None,
        }
    }

    fn saved(id: i64, external_id: &str) -> LocalMovie {
        LocalMovie {
            id,
            external_id: Some(external_id.into()),
            title: format!("Saved {id}"),
            genre: "drama".into(),
            year: None,
            status: WatchStatus::Unwatched,
            rating: None,
            plot: None,
            poster: None,
        }
    }

    impl CatalogSource for FakeSource {
        fn fetch_local(&self) -> BoxFuture<'static, Result<Vec<LocalMovie>, ApiError>> {
            *self.local_fetches.lock().unwrap() += 1;
            let local = self.local.lock().unwrap().clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(local)
            }
            .boxed()
        }

        fn search_external(
            &self,
            query: String,
        ) -> BoxFuture<'static, Result<Vec<ExternalMovie>, ApiError>> {
            self.queries.lock().unwrap().push(query.clone());
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if query == "boom" {
                    return Err(ApiError::Decode("bad payload".into()));
                }
                Ok(vec![
                    external("tt1", &format!("{query} one")),
                    external("tt2", &format!("{query} two")),
                ])
            }
            .boxed()
        }

        fn apply(&self, mutation: Mutation) -> BoxFuture<'static, Result<(), ApiError>> {
            self.mutations.lock().unwrap().push(mutation.clone());
            let local = self.local.clone();
            async move {
                if let Mutation::SaveExternal(id) = mutation {
                    let mut local = local.lock().unwrap();
                    let next_id = local.len() as i64 + 1;
                    local.push(saved(next_id, &id));
                }
                Ok(())
            }
            .boxed()
        }
    }

    struct Harness {
        commands: mpsc::Sender<CatalogCommand>,
        updates: mpsc::Receiver<CatalogUpdate>,
        session: watch::Sender<SessionState>,
        task: JoinHandle<RunExit>,
    }

    fn start(source: FakeSource) -> Harness {
        let (commands, command_rx) = mpsc::channel(16);
        let (update_tx, updates) = mpsc::channel(64);
        let (session, session_rx) = watch::channel(SessionState::Authenticated);
        let runner = CatalogRunner::new(
            source,
            CatalogState::new(9),
            SearchDebouncer::new(Duration::from_millis(600)),
            update_tx,
        );
        let task = tokio::spawn(runner.run(command_rx, session_rx));
        Harness {
            commands,
            updates,
            session,
            task,
        }
    }

    async fn wait_for(
        updates: &mut mpsc::Receiver<CatalogUpdate>,
        pred: impl Fn(&CatalogUpdate) -> bool,
    ) -> CatalogUpdate {
        loop {
            let update = updates.recv().await.expect("runner stopped publishing");
            if pred(&update) {
                return update;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_merges_both_sources() {
        let source = FakeSource::default();
        source.local.lock().unwrap().push(saved(1, "tt1"));
        let mut h = start(source.clone());

        let update = wait_for(&mut h.updates, |u| u.ready).await;
        // tt1 is saved, so only tt2 survives from the external side.
        assert_eq!(update.total_available, 2);
        assert_eq!(update.page.filtered_count, 2);
        assert_eq!(source.queries.lock().unwrap().as_slice(), &[String::new()]);

        h.commands.send(CatalogCommand::Quit).await.unwrap();
        assert_eq!(h.task.await.unwrap(), RunExit::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_burst_dispatches_once() {
        let source = FakeSource::default();
        let mut h = start(source.clone());
        wait_for(&mut h.updates, |u| u.ready).await;

        for text in ["a", "al", "ali", "alie", "alien"] {
            h.commands
                .send(CatalogCommand::Search(text.into()))
                .await
                .unwrap();
        }

        let update = wait_for(&mut h.updates, |u| {
            u.external_query == "alien" && !u.search_pending && u.page.filtered_count == 2
        })
        .await;
        assert_eq!(update.page.records[0].title(), "alien one");
        assert_eq!(
            source.queries.lock().unwrap().as_slice(),
            &[String::new(), "alien".to_string()]
        );

        drop(h.commands);
        assert_eq!(h.task.await.unwrap(), RunExit::CommandsClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_external_search_reports_and_keeps_results() {
        let source = FakeSource::default();
        let mut h = start(source);
        wait_for(&mut h.updates, |u| u.ready && u.total_available == 2).await;

        h.commands
            .send(CatalogCommand::Search("boom".into()))
            .await
            .unwrap();
        let update = wait_for(&mut h.updates, |u| u.message.is_some()).await;
        assert!(update
            .message
            .as_deref()
            .unwrap()
            .starts_with("External search failed"));
        // The earlier default results stay in the merged view.
        assert!(update.ready);
        assert_eq!(update.total_available, 2);
        assert_eq!(update.external_query, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_refetches_both_sources() {
        let source = FakeSource::default();
        let mut h = start(source.clone());
        wait_for(&mut h.updates, |u| u.ready).await;

        h.commands
            .send(CatalogCommand::Mutate(Mutation::SaveExternal("tt2".into())))
            .await
            .unwrap();

        let update = wait_for(&mut h.updates, |u| {
            u.message.as_deref() == Some("Done: save tt2")
        })
        .await;
        assert!(update.message.is_some());

        // After the refetch tt2 is a Local record and the external copy is dropped.
        let update = wait_for(&mut h.updates, |u| {
            u.page.records.iter().filter(|r| r.is_local()).count() == 1
                && u.total_available == 2
        })
        .await;
        assert_eq!(update.page.records[0].local_id(), Some(1));

        assert_eq!(*source.local_fetches.lock().unwrap(), 2);
        assert_eq!(source.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_commands_publish_pages() {
        let source = FakeSource::default();
        source.local.lock().unwrap().push(saved(7, "tt7"));
        let mut h = start(source);
        wait_for(&mut h.updates, |u| u.ready).await;

        h.commands
            .send(CatalogCommand::SetView(ViewMode::Saved))
            .await
            .unwrap();
        let update = h.updates.recv().await.unwrap();
        assert_eq!(update.page.filtered_count, 1);
        assert!(update.page.records.iter().all(|r| r.is_local()));

        h.commands
            .send(CatalogCommand::SetStatus(Some(WatchStatus::Watched)))
            .await
            .unwrap();
        let update = h.updates.recv().await.unwrap();
        assert_eq!(update.page.filtered_count, 0);
        assert_eq!(update.page.total_pages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_stops_runner() {
        let mut h = start(FakeSource::default());
        wait_for(&mut h.updates, |u| u.ready).await;

        h.session.send_replace(SessionState::LoggedOut {
            reason: Some(crate::api::LogoutReason::Expired),
        });
        assert_eq!(h.task.await.unwrap(), RunExit::SessionLost);
    }
}
