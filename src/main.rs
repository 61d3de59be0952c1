use std::{ops::ControlFlow, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use time::macros::format_description;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use url::Url;

use radiom::{
    audio::RodioOutput,
    auth::{AuthSession, AuthStatus, SignUpOutcome},
    backend::{Comment, Price, ProfileChanges, SignUpFields, Station, StationId, WaitlistEntry},
    catalog::CatalogView,
    comments::{CommentEvent, CommentFeed, CommentService},
    config::Config,
    error::{Error, Result},
    events::Event,
    gateway::Gateway,
    player::Player,
    realtime::Realtime,
    signal,
    sleep::SleepTimer,
    store::Store,
    util::format_countdown,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Number of comments printed when a feed is shown.
const COMMENTS_SHOWN: usize = 10;

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Holds the backend URL and its public API key.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("radiom.toml"), env = "RADIOM_CONFIG")]
    config_file: String,

    /// State file
    ///
    /// Keeps the sign-in session and guest choice across restarts. Ensure
    /// that this file is kept private: it grants access to your account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("radiom-state.toml"), env = "RADIOM_STATE")]
    state_file: String,

    /// Initial volume in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100), default_value_t = 70, env = "RADIOM_VOLUME")]
    volume: u8,

    /// Audio output device
    ///
    /// [default: system default device]
    #[arg(short, long, env = "RADIOM_DEVICE")]
    device: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive: this arm means quiet.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("radiom", level);
    }

    logger.init();
}

const HELP: &str = "\
commands:
  list [QUERY]            stations, optionally filtered
  featured                featured stations
  play N                  play station N
  pause | resume | toggle
  volume PERCENT
  sleep [15|30|60|90|off] show, toggle or cancel the sleep timer
  now                     what is playing
  comments                reload the comments of the playing station
  say TEXT                post a comment
  login EMAIL PASSWORD
  signup EMAIL PASSWORD USERNAME [FULL NAME]
  oauth PROVIDER          print the federated sign-in URL
  callback URL            finish a federated sign-in
  reset EMAIL             request a password reset
  guest                   continue without an account
  logout
  profile                 show your profile
  status TEXT             set your status line
  waitlist NAME | EMAIL | COUNTRY [| $1|$3|$5]
                          join the waiting list for the music catalog
  reload                  refetch the station catalog
  quit";

/// Interactive client state, driven by [`run`].
struct App {
    gateway: Arc<Gateway>,
    realtime: Arc<Realtime>,
    auth: AuthSession<Gateway>,
    player: Player<RodioOutput>,
    catalog: CatalogView,
    feed: CommentFeed,

    /// Results of comment fetches running in the background.
    loaded_tx: mpsc::UnboundedSender<(StationId, Result<Vec<Comment>>)>,

    /// Push events of the playing station. Dropping it ends the
    /// subscription.
    push_rx: Option<mpsc::UnboundedReceiver<CommentEvent>>,
    subscription: Option<JoinHandle<()>>,
}

impl App {
    fn print_station(number: usize, station: &Station) {
        let live = station
            .current_track
            .as_deref()
            .map(|track| format!(" - {track}"))
            .unwrap_or_default();
        println!("{number:>3}. {}{live}", station.name);
    }

    fn list(&self, query: &str) {
        if let Some(notice) = self.catalog.fallback_notice() {
            println!("{notice}; using demo stations");
        }

        let matches: Vec<_> = self.catalog.filter(query).collect();
        if matches.is_empty() {
            println!("no stations match \"{query}\"");
            return;
        }

        for station in matches {
            if let Some(number) = self.number_of(&station.id) {
                Self::print_station(number, station);
            }
        }
    }

    fn featured(&self) {
        let mut any = false;
        for station in self.catalog.featured() {
            if let Some(number) = self.number_of(&station.id) {
                Self::print_station(number, station);
                any = true;
            }
        }
        if !any {
            println!("no featured stations");
        }
    }

    fn number_of(&self, id: &StationId) -> Option<usize> {
        self.catalog
            .stations()
            .iter()
            .position(|station| &station.id == id)
            .map(|index| index + 1)
    }

    async fn reload_catalog(&mut self) {
        self.catalog = CatalogView::load(self.gateway.as_ref()).await;
    }

    fn play(&mut self, number: &str) {
        let Some(station) = number
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| self.catalog.stations().get(index))
            .cloned()
        else {
            println!("no station {number}; try \"list\"");
            return;
        };

        self.player.select_station(&station);
        self.open_feed(&station.id);
    }

    /// Loads the comments of `station` and subscribes to its changes.
    fn open_feed(&mut self, station: &StationId) {
        self.load_comments(station);

        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        self.push_rx = Some(push_rx);

        let realtime = Arc::clone(&self.realtime);
        let gateway = Arc::clone(&self.gateway);
        let station = station.clone();
        self.subscription = Some(tokio::spawn(async move {
            realtime.keep_subscribed(gateway, station, push_tx).await;
        }));
    }

    fn load_comments(&mut self, station: &StationId) {
        self.feed.begin_load(station.clone());

        let gateway = Arc::clone(&self.gateway);
        let loaded_tx = self.loaded_tx.clone();
        let station = station.clone();
        tokio::spawn(async move {
            let result = gateway.comments(&station).await;
            if loaded_tx.send((station, result)).is_err() {
                debug!("comment fetch finished after shutdown");
            }
        });
    }

    fn print_comment(comment: &Comment) {
        let at = comment
            .posted_at()
            .and_then(|at| at.format(format_description!("[hour]:[minute]")).ok())
            .unwrap_or_default();
        println!("  [{at}] {}: {}", comment.author_name(), comment.content);
    }

    fn print_feed(&self) {
        if let Some(notice) = self.feed.notice() {
            println!("{notice}");
        }
        if self.feed.comments().is_empty() {
            println!("  no comments yet");
        }
        for comment in self.feed.comments().iter().take(COMMENTS_SHOWN).rev() {
            Self::print_comment(comment);
        }
    }

    fn now(&self) {
        let state = self.player.state();
        match &state.station {
            Some(station) => println!(
                "{} {} at {:.0}%",
                if state.playing { "playing" } else { "stopped:" },
                station.name,
                state.volume * 100.0
            ),
            None => println!("nothing selected"),
        }

        if self.player.sleep_timer().is_armed() {
            println!(
                "sleeping in {}",
                format_countdown(self.player.sleep_remaining())
            );
        }
    }

    fn sleep(&mut self, arg: &str) {
        match arg {
            "" => {
                if self.player.sleep_timer().is_armed() {
                    println!(
                        "sleeping in {}",
                        format_countdown(self.player.sleep_remaining())
                    );
                } else {
                    let presets: Vec<_> =
                        SleepTimer::PRESETS.iter().map(ToString::to_string).collect();
                    println!("sleep timer off; presets: {} minutes", presets.join(", "));
                }
            }
            "off" | "cancel" => self.player.cancel_sleep_timer(),
            minutes => match minutes.parse::<u32>() {
                Ok(minutes) if SleepTimer::PRESETS.contains(&minutes) => {
                    self.player.toggle_sleep_timer(minutes);
                }
                _ => println!("pick one of 15, 30, 60 or 90 minutes"),
            },
        }
    }

    async fn say(&mut self, text: &str) {
        let Some(author) = self.auth.user_id().cloned() else {
            println!("sign in to comment");
            return;
        };
        let Some(station) = self.feed.station().cloned() else {
            println!("play a station first");
            return;
        };

        if let Err(e) = self
            .feed
            .submit(self.gateway.as_ref(), &station, text, &author)
            .await
        {
            println!("{}", e.notice());
            return;
        }
        if let Some(comment) = self.feed.comments().first() {
            Self::print_comment(comment);
        }
    }

    fn print_status(&self) {
        match self.auth.status() {
            AuthStatus::Loading => println!("checking sign-in"),
            AuthStatus::Authenticated(profile) => println!("signed in as {}", profile.username),
            AuthStatus::Guest => println!("browsing as guest"),
            AuthStatus::Unauthenticated => {
                println!("not signed in; use \"login\", \"signup\" or \"guest\"");
            }
        }
    }

    fn print_profile(&self) {
        let Some(profile) = self.auth.profile() else {
            self.print_status();
            return;
        };

        println!("{} ({})", profile.username, profile.email);
        if !profile.full_name.is_empty() {
            println!("  name:    {}", profile.full_name);
        }
        if !profile.status.is_empty() {
            println!("  status:  {}", profile.status);
        }
        if !profile.country.is_empty() {
            println!("  country: {}", profile.country);
        }
        if profile.is_premium {
            println!("  premium");
        }
    }

    fn report(result: Result<()>) {
        if let Err(e) = result {
            warn!("{e}");
            println!("{}", e.notice());
        }
    }

    async fn command(&mut self, line: &str) -> ControlFlow<()> {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => {}
            "help" | "?" => println!("{HELP}"),
            "quit" | "exit" => return ControlFlow::Break(()),

            "list" | "search" => self.list(rest),
            "featured" => self.featured(),
            "reload" => self.reload_catalog().await,
            "play" => self.play(rest),
            "pause" => self.player.pause(),
            "resume" => self.player.resume(),
            "toggle" => self.player.toggle(),
            "volume" => match rest.parse::<f32>() {
                Ok(percent) => {
                    let volume = self.player.set_volume(percent / 100.0);
                    println!("volume {:.0}%", volume * 100.0);
                }
                Err(_) => println!("volume takes a percentage"),
            },
            "sleep" => self.sleep(rest),
            "now" => self.now(),

            "comments" => match self.feed.station().cloned() {
                Some(station) => self.load_comments(&station),
                None => println!("play a station first"),
            },
            "say" | "comment" => self.say(rest).await,

            "login" => {
                let mut args = rest.split_whitespace();
                let (email, password) = (args.next().unwrap_or(""), args.next().unwrap_or(""));
                Self::report(self.auth.sign_in(email, password).await);
                self.print_status();
            }
            "signup" => {
                let mut args = rest.splitn(4, ' ');
                let email = args.next().unwrap_or("");
                let password = args.next().unwrap_or("");
                let fields = SignUpFields {
                    username: args.next().unwrap_or("").to_owned(),
                    full_name: args.next().unwrap_or("").trim().to_owned(),
                    ..Default::default()
                };
                match self.auth.sign_up(email, password, &fields).await {
                    Ok(SignUpOutcome::Authenticated) => self.print_status(),
                    Ok(SignUpOutcome::ConfirmationPending) => {
                        println!("check your e-mail to confirm your account");
                    }
                    Err(e) => Self::report(Err(e)),
                }
            }
            "oauth" => match self.auth.federated_sign_in_url(rest) {
                Ok(url) => println!("open {url} and paste the address you land on after \"callback\""),
                Err(e) => Self::report(Err(e)),
            },
            "callback" => match Url::parse(rest) {
                Ok(url) => {
                    Self::report(self.auth.complete_federated_sign_in(&url).await);
                    self.print_status();
                }
                Err(e) => Self::report(Err(Error::from(e))),
            },
            "reset" => {
                Self::report(self.auth.reset_password(rest).await);
                println!("if the address is registered, a reset e-mail is on its way");
            }
            "guest" => {
                Self::report(self.auth.continue_as_guest());
                self.print_status();
            }
            "logout" => {
                self.auth.sign_out().await;
                self.print_status();
            }
            "profile" | "whoami" => self.print_profile(),
            "waitlist" => match parse_waitlist(rest) {
                Ok(entry) => match self.gateway.join_waiting_list(&entry).await {
                    Ok(()) => println!("{}", WaitlistEntry::THANKS),
                    Err(e) => {
                        error!("error joining the waiting list: {e}");
                        println!("{}", WaitlistEntry::FAILURE_NOTICE);
                    }
                },
                Err(e) => Self::report(Err(e)),
            },
            "status" => {
                let changes = ProfileChanges {
                    status: Some(rest.to_owned()),
                    ..Default::default()
                };
                match self.auth.update_profile(&changes).await {
                    Ok(_) => self.print_profile(),
                    Err(e) => Self::report(Err(e)),
                }
            }

            _ => println!("unknown command \"{command}\"; try \"help\""),
        }

        ControlFlow::Continue(())
    }

    fn on_event(&self, event: Event) {
        match event {
            Event::Play => {
                if let Some(station) = self.player.station() {
                    println!("playing {}", station.name);
                }
            }
            Event::Pause => println!("paused"),
            Event::PlaybackFailed => println!("this station cannot be played right now"),
            Event::SleepTimerArmed => println!(
                "sleeping in {}",
                format_countdown(self.player.sleep_remaining())
            ),
            Event::SleepTimerCancelled => println!("sleep timer off"),
            Event::SleepTimerElapsed => println!("sleep timer elapsed; good night"),
            Event::StationChanged => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }
        self.push_rx = None;
        self.player.pause();
    }
}

/// Waits for the next push event, or forever without a subscription.
async fn next_push(
    push_rx: &mut Option<mpsc::UnboundedReceiver<CommentEvent>>,
) -> Option<CommentEvent> {
    match push_rx {
        Some(push_rx) => push_rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when the configuration cannot be loaded,
/// the audio device cannot be opened, or standard input fails.
async fn run(args: Args) -> Result<()> {
    let config = Config::from_file(&args.config_file).inspect_err(|e| {
        if e.kind == radiom::error::ErrorKind::NotFound {
            info!("copy radiom.toml.example to {} to get started", args.config_file);
        }
    })?;
    debug!("backend {}", config.backend_url);

    let gateway = Arc::new(Gateway::new(&config)?);
    let realtime = Arc::new(Realtime::new(&config)?);

    let mut auth = AuthSession::new(Arc::clone(&gateway), Store::open(&args.state_file)?);
    auth.init().await;

    let (output, device_events) = RodioOutput::open(args.device.as_deref())?;
    let mut player = Player::new(output, device_events);
    player.set_volume(f32::from(args.volume) / 100.0);

    let (event_tx, mut events) = mpsc::unbounded_channel();
    player.register(event_tx);

    let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel();
    let mut app = App {
        gateway,
        realtime,
        auth,
        player,
        catalog: CatalogView::default(),
        feed: CommentFeed::new(),
        loaded_tx,
        push_rx: None,
        subscription: None,
    };

    app.print_status();
    app.reload_catalog().await;
    app.list("");
    println!("type \"help\" for commands");

    let mut signals = signal::Handler::new()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("received {signal}; shutting down");
                    break;
                }
                info!("received {signal}; reloading stations");
                app.reload_catalog().await;
            }

            line = lines.next_line() => match line? {
                Some(line) => {
                    if app.command(&line).await.is_break() {
                        break;
                    }
                }
                None => break,
            },

            _ = app.player.next_event() => {}

            Some(event) = events.recv() => app.on_event(event),

            Some((station, result)) = loaded_rx.recv() => {
                let current = app.feed.station() == Some(&station);
                app.feed.apply_loaded(&station, result);
                if current {
                    app.print_feed();
                }
            }

            push = next_push(&mut app.push_rx) => match push {
                Some(event) => {
                    let inserted = match &event {
                        CommentEvent::Inserted(comment) => Some(comment.clone()),
                        CommentEvent::Deleted { .. } => None,
                    };
                    if app.feed.apply(event) {
                        match inserted {
                            Some(comment) => App::print_comment(&comment),
                            None => debug!("a comment was removed"),
                        }
                    }
                }
                None => app.push_rx = None,
            },
        }
    }

    app.shutdown();
    Ok(())
}

/// Parses `NAME | EMAIL | COUNTRY [| PRICE]`.
fn parse_waitlist(args: &str) -> Result<WaitlistEntry> {
    let mut fields = args.split('|').map(str::trim);
    let name = fields.next().unwrap_or_default();
    let email = fields.next().unwrap_or_default();
    let country = fields.next().unwrap_or_default();
    let price = match fields.next() {
        Some(price) if !price.is_empty() => price.parse()?,
        _ => Price::default(),
    };
    WaitlistEntry::new(name, email, country, price)
}

/// Main entry point of the application.
///
/// The audio device must stay on the thread that opened it, so everything
/// runs on a single-threaded runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
