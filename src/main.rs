use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cinelist::api::{
    ApiError, AuthApi, ExternalMovie, LocalMovie, LocalQuery, MovieUpdate, MoviesApi, NewMovie,
    RegisterRequest, Session, SessionClient, WatchStatus, FALLBACK_GENRE, GENRES,
};
use cinelist::catalog::{
    CatalogCommand, CatalogRecord, CatalogRunner, CatalogState, CatalogUpdate, FetchOutcome,
    Mutation, PageView, RunExit, SearchDebouncer, ViewMode,
};
use cinelist::config::Config;
use cinelist::storage::{Database, DatabaseError};
use cinelist::util::{fit_column, strip_control_chars};

/// Get the config directory path (~/.config/cinelist/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("cinelist"))
}

#[derive(Parser, Debug)]
#[command(name = "cinelist", about = "Movie watchlist client", version)]
struct Args {
    /// Config file (default: ~/.config/cinelist/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account (passwords are read from stdin)
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// Log in (password is read from stdin)
    Login { username: String },
    /// Forget stored credentials
    Logout,
    /// List the merged catalog
    Browse {
        /// Saved movies only
        #[arg(long)]
        saved: bool,
        #[arg(long)]
        status: Option<WatchStatus>,
        #[arg(long)]
        genre: Option<String>,
        /// Title filter; also used as the external search query
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Read commands from stdin and keep the view live
        #[arg(long, short)]
        interactive: bool,
    },
    /// Show a saved movie
    Show { id: i64 },
    /// Show external catalog details
    Details { external_id: String },
    /// Save an external movie to the watchlist
    Save { external_id: String },
    /// Add a movie by hand
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = FALLBACK_GENRE)]
        genre: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        rating: Option<f32>,
        #[arg(long)]
        plot: Option<String>,
        #[arg(long)]
        poster: Option<String>,
        #[arg(long)]
        imdb_id: Option<String>,
        #[arg(long)]
        watched: bool,
    },
    /// Change fields of a saved movie
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        status: Option<WatchStatus>,
        #[arg(long)]
        rating: Option<f32>,
        #[arg(long)]
        plot: Option<String>,
        #[arg(long)]
        poster: Option<String>,
    },
    /// Delete a saved movie
    Delete { id: i64 },
    /// Mark a saved movie as watched
    Watched { id: i64 },
    /// Mark a saved movie as unwatched
    Unwatched { id: i64 },
    /// Watchlist statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("session.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the session store is locked by another cinelist process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open session store: {}", e)),
    };

    let session = Session::init(db)
        .await
        .context("Failed to load stored session")?;
    let client = SessionClient::new(&config.api_url, session.clone())
        .context("Failed to create HTTP client")?;
    let auth = AuthApi::new(client.clone());
    let movies = MoviesApi::new(client);

    let needs_login = !matches!(
        args.command,
        Command::Register { .. } | Command::Login { .. } | Command::Logout
    );
    if needs_login && !session.is_authenticated() {
        eprintln!("Not logged in. Run: cinelist login <username>");
        std::process::exit(1);
    }

    match run_command(args.command, &config, &session, &auth, &movies).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(api_err) = e.downcast_ref::<ApiError>() {
                report_api_error(api_err);
                std::process::exit(1);
            }
            Err(e)
        }
    }
}

async fn run_command(
    command: Command,
    config: &Config,
    session: &Session,
    auth: &AuthApi,
    movies: &MoviesApi,
) -> Result<()> {
    match command {
        Command::Register {
            username,
            email,
            first_name,
            last_name,
        } => {
            let password = prompt("Password: ")?;
            let password2 = prompt("Confirm password: ")?;
            auth.register(&RegisterRequest {
                username,
                email,
                password,
                password2,
                first_name,
                last_name,
            })
            .await?;
            println!("Account created. Log in with: cinelist login <username>");
        }
        Command::Login { username } => {
            let password = prompt("Password: ")?;
            auth.login(&username, &password).await?;
            println!("Logged in as {}", username);
        }
        Command::Logout => {
            auth.logout().await?;
            println!("Logged out.");
        }
        Command::Browse {
            saved,
            status,
            genre,
            search,
            page,
            interactive,
        } => {
            let mut state = CatalogState::new(config.page_size);
            state.set_view_mode(if saved { ViewMode::Saved } else { ViewMode::All });
            state.set_status(status);
            state.set_genre(genre);
            state.set_search_text(search.clone());

            if interactive {
                browse_interactive(config, session, movies.clone(), state).await?;
            } else {
                browse_once(movies, state, &search, page).await?;
            }
        }
        Command::Show { id } => print_local(&movies.get_local(id).await?),
        Command::Details { external_id } => {
            print_external(&movies.external_details(&external_id).await?)
        }
        Command::Save { external_id } => {
            let saved = movies.save_external(&external_id).await?;
            println!("Saved \"{}\" as #{}", strip_control_chars(&saved.title), saved.id);
        }
        Command::Add {
            title,
            genre,
            year,
            rating,
            plot,
            poster,
            imdb_id,
            watched,
        } => {
            if !GENRES.contains(&genre.as_str()) {
                tracing::warn!(genre = %genre, "Genre is not one of the known choices");
            }
            let movie = NewMovie {
                external_id: imdb_id,
                title,
                genre,
                year,
                status: if watched {
                    WatchStatus::Watched
                } else {
                    WatchStatus::Unwatched
                },
                plot,
                poster,
                rating,
            }
            .normalized();
            let created = movies.create(&movie).await?;
            println!("Added \"{}\" as #{}", strip_control_chars(&created.title), created.id);
        }
        Command::Edit {
            id,
            title,
            genre,
            year,
            status,
            rating,
            plot,
            poster,
        } => {
            let update = MovieUpdate {
                title,
                genre,
                year,
                status,
                plot,
                poster,
                rating,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to change; pass at least one field");
            }
            print_local(&movies.update(id, &update).await?);
        }
        Command::Delete { id } => {
            movies.delete(id).await?;
            println!("Deleted #{}", id);
        }
        Command::Watched { id } => {
            movies.mark_watched(id).await?;
            println!("Marked #{} as watched", id);
        }
        Command::Unwatched { id } => {
            movies.mark_unwatched(id).await?;
            println!("Marked #{} as unwatched", id);
        }
        Command::Stats => {
            let everything = LocalQuery::default();
            let (stats, local, external) = tokio::join!(
                movies.stats(),
                movies.list_local(&everything),
                movies.search_external("")
            );
            let stats = stats?;
            println!("Watched:            {}", stats.watched_movies);
            println!("Watched this month: {}", stats.watched_this_month);
            // The total is informational; a failed source just leaves it out.
            if let (Ok(local), Ok(external)) = (local, external) {
                println!(
                    "Total available:    {}",
                    cinelist::catalog::total_available(&local, &external)
                );
            }
            if !stats.by_genre.is_empty() {
                println!("\nBy genre:");
                for (genre, count) in &stats.by_genre {
                    println!("  {} {}", fit_column(genre, 14), count);
                }
            }
            if !stats.recent_watched.is_empty() {
                println!("\nRecently watched:");
                for movie in &stats.recent_watched {
                    println!("  {}", record_row(&CatalogRecord::Local(movie.clone())));
                }
            }
        }
    }
    Ok(())
}

/// Fetch both sources once, apply the filters and print one page.
async fn browse_once(
    movies: &MoviesApi,
    mut state: CatalogState,
    search: &str,
    page: usize,
) -> Result<()> {
    let local_gen = state.begin_local_fetch();
    let external_gen = state.begin_external_fetch(search);
    let everything = LocalQuery::default();
    let (local, external) = tokio::join!(
        movies.list_local(&everything),
        movies.search_external(search)
    );

    if let FetchOutcome::Failed(e) = state.complete_local_fetch(local_gen, local) {
        if e.requires_login() {
            return Err(e.into());
        }
        eprintln!("Warning: failed to load your movies: {}", e);
    }
    if let FetchOutcome::Failed(e) = state.complete_external_fetch(external_gen, external)
    {
        if e.requires_login() {
            return Err(e.into());
        }
        eprintln!("Warning: external search failed: {}", e);
    }

    if page != 1 && !state.go_to_page(page) {
        eprintln!(
            "Page {} is out of range (1-{}), showing page {}",
            page,
            state.window().total_pages(state.filtered_count()),
            state.window().page_number()
        );
    }
    print_page(&state.visible(), state.total_available());
    Ok(())
}

/// Drive the catalog runner from stdin lines until `:quit` or EOF.
async fn browse_interactive(
    config: &Config,
    session: &Session,
    movies: MoviesApi,
    state: CatalogState,
) -> Result<()> {
    let (command_tx, command_rx) = mpsc::channel::<CatalogCommand>(32);
    let (update_tx, mut update_rx) = mpsc::channel::<CatalogUpdate>(32);

    let runner = CatalogRunner::new(
        movies,
        state,
        SearchDebouncer::new(config.search_debounce()),
        update_tx,
    );
    let runner_task = tokio::spawn(runner.run(command_rx, session.subscribe()));

    eprintln!("Commands: :page N, :status watched|unwatched|any, :genre NAME|any, :view all|saved,");
    eprintln!("          :watched ID, :unwatched ID, :save IMDB_ID, :delete ID, :refresh, :quit");
    eprintln!("Any other line is a search.");

    let input_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            };
            match parse_input(&line) {
                Ok(command) => {
                    let quit = command == CatalogCommand::Quit;
                    if command_tx.send(command).await.is_err() || quit {
                        break;
                    }
                }
                Err(msg) => eprintln!("{}", msg),
            }
        }
    });

    while let Some(update) = update_rx.recv().await {
        if let Some(message) = &update.message {
            println!("{}", message);
        }
        if !update.ready {
            println!("Loading...");
            continue;
        }
        if update.search_pending {
            continue;
        }
        print_page(&update.page, update.total_available);
    }

    input_task.abort();
    match runner_task.await.context("Catalog task panicked")? {
        RunExit::SessionLost => {
            eprintln!("Your session has expired. Run: cinelist login <username>");
            std::process::exit(1);
        }
        RunExit::Quit | RunExit::CommandsClosed => Ok(()),
    }
}

/// Map one stdin line to a runner command.
fn parse_input(line: &str) -> Result<CatalogCommand, String> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(CatalogCommand::Search(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest.trim(), ""),
    };
    let parse_id = |arg: &str| arg.parse::<i64>().map_err(|_| format!("Not a movie id: '{arg}'"));

    match name {
        "q" | "quit" => Ok(CatalogCommand::Quit),
        "page" => arg
            .parse()
            .map(CatalogCommand::GoToPage)
            .map_err(|_| format!("Not a page number: '{arg}'")),
        "status" => match arg {
            "" | "any" | "all" => Ok(CatalogCommand::SetStatus(None)),
            s => s.parse().map(|st| CatalogCommand::SetStatus(Some(st))),
        },
        "genre" => match arg {
            "" | "any" | "all" => Ok(CatalogCommand::SetGenre(None)),
            g => Ok(CatalogCommand::SetGenre(Some(g.to_string()))),
        },
        "view" => arg.parse().map(CatalogCommand::SetView),
        "refresh" => Ok(CatalogCommand::Refresh),
        "watched" => parse_id(arg).map(|id| CatalogCommand::Mutate(Mutation::MarkWatched(id))),
        "unwatched" => parse_id(arg).map(|id| CatalogCommand::Mutate(Mutation::MarkUnwatched(id))),
        "delete" => parse_id(arg).map(|id| CatalogCommand::Mutate(Mutation::Delete(id))),
        "save" if !arg.is_empty() => {
            Ok(CatalogCommand::Mutate(Mutation::SaveExternal(arg.to_string())))
        }
        other => Err(format!("Unknown command ':{other}'")),
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_page(view: &PageView, total_available: usize) {
    if view.records.is_empty() {
        println!("No movies match.");
    }
    for record in &view.records {
        println!("{}", record_row(record));
    }
    println!(
        "-- page {}/{} ({} shown of {} matching, {} available)",
        view.page_number,
        view.total_pages,
        view.records.len(),
        view.filtered_count,
        total_available
    );
}

fn record_row(record: &CatalogRecord) -> String {
    let key = match (record.local_id(), record.external_id()) {
        (Some(id), _) => format!("#{id}"),
        (None, Some(external_id)) => external_id.to_string(),
        (None, None) => "-".to_string(),
    };
    let status = record.status().map(WatchStatus::as_str).unwrap_or("");
    let rating = record
        .rating()
        .map(|r| format!("{r:.1}"))
        .unwrap_or_else(|| "-".into());
    format!(
        "{} {} {} {} {} {}",
        fit_column(&key, 11),
        fit_column(status, 9),
        fit_column(&strip_control_chars(record.title()), 40),
        fit_column(&year_text(record.year()), 4),
        fit_column(&rating, 4),
        fit_column(record.genre().unwrap_or("-"), 12),
    )
}

fn year_text(year: Option<i32>) -> String {
    year.map(|y| y.to_string()).unwrap_or_else(|| "-".into())
}

fn print_local(movie: &LocalMovie) {
    println!("#{} {}", movie.id, strip_control_chars(&movie.title));
    println!("  Status:  {}", movie.status);
    println!("  Genre:   {}", movie.genre);
    println!("  Year:    {}", year_text(movie.year));
    if let Some(rating) = movie.rating {
        println!("  Rating:  {:.1}", rating);
    }
    if let Some(external_id) = &movie.external_id {
        println!("  IMDb:    {}", external_id);
    }
    if let Some(plot) = &movie.plot {
        println!("\n{}", strip_control_chars(plot));
    }
}

fn print_external(movie: &ExternalMovie) {
    println!("{} {}", movie.external_id, strip_control_chars(&movie.title));
    println!("  Genre:   {}", movie.genre.as_deref().unwrap_or("-"));
    println!("  Year:    {}", year_text(movie.year));
    if let Some(rating) = movie.rating {
        println!("  Rating:  {:.1}", rating);
    }
    if let Some(plot) = &movie.plot {
        println!("\n{}", strip_control_chars(plot));
    }
}

fn report_api_error(err: &ApiError) {
    match err {
        ApiError::Validation(fields) => {
            eprintln!("Error: the server rejected the request");
            for (field, messages) in fields.iter() {
                eprintln!("  {}: {}", field, messages.join(" "));
            }
        }
        e if e.requires_login() => {
            eprintln!("Your session has expired. Run: cinelist login <username>");
        }
        ApiError::AuthExpired => {
            eprintln!("Error: the server rejected this request even after renewing your credentials.");
            eprintln!("You are still logged in; try again, or run: cinelist login <username>");
        }
        ApiError::NotFound => eprintln!("Error: not found"),
        e => match e.detail() {
            Some(detail) => eprintln!("Error: {}", detail),
            None => eprintln!("Error: {}", e),
        },
    }
}

/// Read one line from stdin after printing `label` to stderr.
fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_search_by_default() {
        assert_eq!(
            parse_input("blade runner"),
            Ok(CatalogCommand::Search("blade runner".into()))
        );
        assert_eq!(parse_input(""), Ok(CatalogCommand::Search(String::new())));
    }

    #[test]
    fn test_parse_input_commands() {
        assert_eq!(parse_input(":page 2"), Ok(CatalogCommand::GoToPage(2)));
        assert_eq!(
            parse_input(":status watched"),
            Ok(CatalogCommand::SetStatus(Some(WatchStatus::Watched)))
        );
        assert_eq!(parse_input(":status any"), Ok(CatalogCommand::SetStatus(None)));
        assert_eq!(
            parse_input(":view saved"),
            Ok(CatalogCommand::SetView(ViewMode::Saved))
        );
        assert_eq!(
            parse_input(":save tt0083658"),
            Ok(CatalogCommand::Mutate(Mutation::SaveExternal("tt0083658".into())))
        );
        assert_eq!(parse_input(":quit"), Ok(CatalogCommand::Quit));
    }

    #[test]
    fn test_parse_input_errors() {
        assert!(parse_input(":page two").is_err());
        assert!(parse_input(":delete x").is_err());
        assert!(parse_input(":frobnicate").is_err());
    }

    #[test]
    fn test_record_row_columns() {
        let external = CatalogRecord::External(ExternalMovie {
            external_id: "tt0078748".into(),
            title: "Alien".into(),
            genre: None,
            year: Some(1979),
            rating: Some(8.5),
            plot: None,
            poster: None,
        });
        let row = record_row(&external);
        assert_eq!(
            row.split_whitespace().collect::<Vec<_>>(),
            vec!["tt0078748", "Alien", "1979", "8.5", "-"]
        );

        let saved = CatalogRecord::Local(LocalMovie {
            id: 3,
            external_id: None,
            title: "Heat".into(),
            genre: "crime".into(),
            year: None,
            status: WatchStatus::Watched,
            rating: None,
            plot: None,
            poster: None,
        });
        assert_eq!(
            record_row(&saved).split_whitespace().collect::<Vec<_>>(),
            vec!["#3", "watched", "Heat", "-", "-", "crime"]
        );
    }
}
