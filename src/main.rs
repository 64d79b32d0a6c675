use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use enrollment_wizard::api::types::OpenIdFlowType;
use enrollment_wizard::api::{HttpProxyClient, ProxyApi};
use enrollment_wizard::config::Config;
use enrollment_wizard::flows::openid::CallbackParams;
use enrollment_wizard::flows::{EnrollmentFlow, FlowError, OpenIdFlow, PasswordResetFlow};
use enrollment_wizard::logging;
use enrollment_wizard::session::{
    EnrollmentStep, Navigator, PasswordResetStep, Route, SystemClock, WizardSession, WizardStep,
};
use enrollment_wizard::storage;

#[derive(Parser)]
#[command(name = "enrollment-wizard")]
#[command(about = "Enroll in the VPN or reset your password through the enrollment proxy")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// New user enrollment
    Enroll {
        #[command(subcommand)]
        action: EnrollAction,
    },

    /// Password reset
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// OpenID login helpers
    Openid {
        #[command(subcommand)]
        action: OpenIdAction,
    },

    /// Show the proxy version
    Info,

    /// Write the effective configuration to .wizard/config.toml
    Init,
}

#[derive(Subcommand)]
enum EnrollAction {
    /// Run the enrollment wizard with a token from the invitation email
    Run {
        /// Enrollment token
        #[arg(short, long)]
        token: String,

        /// Phone number to store on the account
        #[arg(long)]
        phone: Option<String>,

        /// VPN device name
        #[arg(long)]
        device_name: Option<String>,

        /// WireGuard public key of the device
        #[arg(long)]
        pubkey: Option<String>,
    },

    /// Show the stored enrollment session
    Status,

    /// Discard the stored enrollment session
    Reset,
}

#[derive(Subcommand)]
enum PasswordAction {
    /// Email a password reset link
    Request {
        #[arg(short, long)]
        email: String,
    },

    /// Open a reset link and choose a new password
    Run {
        /// Token from the reset link
        #[arg(short, long)]
        token: String,
    },

    /// Show the stored password reset session
    Status,

    /// Discard the stored password reset session
    Reset,
}

#[derive(Subcommand)]
enum OpenIdAction {
    /// Print the provider login URL
    AuthInfo {
        /// Request the MFA login URL instead of enrollment
        #[arg(long)]
        mfa: bool,

        #[arg(long)]
        state: Option<String>,
    },

    /// Complete a provider redirect
    Callback {
        #[arg(long)]
        code: String,

        #[arg(long)]
        state: String,

        /// Complete an MFA login instead of enrollment
        #[arg(long)]
        mfa: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let logging_handle = logging::init_logging(&config, cli.debug)?;

    let result = match cli.command {
        Commands::Enroll { action } => match action {
            EnrollAction::Run {
                token,
                phone,
                device_name,
                pubkey,
            } => cmd_enroll_run(&config, &token, phone, device_name, pubkey).await,
            EnrollAction::Status => cmd_enroll_status(&config),
            EnrollAction::Reset => cmd_enroll_reset(&config),
        },
        Commands::Password { action } => match action {
            PasswordAction::Request { email } => cmd_password_request(&config, &email).await,
            PasswordAction::Run { token } => cmd_password_run(&config, &token).await,
            PasswordAction::Status => cmd_password_status(&config),
            PasswordAction::Reset => cmd_password_reset(&config),
        },
        Commands::Openid { action } => match action {
            OpenIdAction::AuthInfo { mfa, state } => {
                cmd_openid_auth_info(&config, mfa, state.as_deref()).await
            }
            OpenIdAction::Callback { code, state, mfa } => {
                cmd_openid_callback(&config, &code, &state, mfa).await
            }
        },
        Commands::Info => cmd_info(&config).await,
        Commands::Init => cmd_init(&config),
    };

    print_log_path(logging_handle.log_file_path);
    result
}

fn print_log_path(log_file_path: Option<PathBuf>) {
    if let Some(log_path) = log_file_path {
        if let Ok(metadata) = log_path.metadata() {
            if metadata.len() > 0 {
                eprintln!("Session log: {}", log_path.display());
            }
        }
    }
}

fn proxy(config: &Config) -> Result<Arc<dyn ProxyApi>> {
    Ok(Arc::new(HttpProxyClient::new(&config.api)?))
}

fn open_session<S: WizardStep>(config: &Config, key: &str, route: Route) -> Result<WizardSession<S>> {
    let session = WizardSession::open(
        key,
        storage::from_config(config),
        Navigator::new(route),
        Arc::new(SystemClock),
    )
    .with_context(|| format!("Failed to open session '{key}'"))?;
    Ok(session)
}

fn prompt(label: &str) -> Result<String> {
    read_answer(&mut io::stdin().lock(), &mut io::stdout(), label)
}

/// Closed input is an error, never an empty answer
fn read_answer(input: &mut impl BufRead, output: &mut impl Write, label: &str) -> Result<String> {
    write!(output, "{label}: ")?;
    output.flush()?;

    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .with_context(|| format!("Failed to read {label}"))?;
    anyhow::ensure!(read > 0, "input closed while waiting for {label}");
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [Y/n]"))?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y")
}

/// Print a friendly message for an expired session, pass other errors on
fn report(err: FlowError) -> Result<()> {
    if err.is_expired() {
        println!("Your session has expired. Start again from the link in your email.");
        return Ok(());
    }
    Err(err.into())
}

fn print_step<S: WizardStep>(session: &WizardSession<S>) {
    match session.current_step() {
        Some(step) => println!(
            "Step {}/{}: {}",
            step.index() + 1,
            S::steps_max() + 1,
            step.label()
        ),
        None => println!("Step {}: unknown", session.step_index()),
    }
}

async fn cmd_enroll_run(
    config: &Config,
    token: &str,
    phone: Option<String>,
    device_name: Option<String>,
    pubkey: Option<String>,
) -> Result<()> {
    let session = open_session(config, &config.wizard.enrollment_key, Route::Home)?;
    let mut flow = EnrollmentFlow::new(proxy(config)?, session);

    let payload = match flow.start(token).await {
        Ok(payload) => payload,
        Err(FlowError::Api(e)) if e.is_rejection() => {
            println!("This enrollment link is invalid or has already been used.");
            return Ok(());
        }
        Err(e) => return report(e),
    };

    println!("Welcome, {}!", payload.user.full_name());
    println!(
        "Your administrator is {} <{}>.",
        payload.admin.name, payload.admin.email
    );
    println!(
        "Session time left: {}",
        flow.session().time_left_display()
    );
    println!();

    match run_enrollment_steps(&mut flow, phone, device_name, pubkey).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast::<FlowError>() {
            Ok(flow_err) => report(flow_err),
            Err(e) => Err(e),
        },
    }
}

async fn run_enrollment_steps(
    flow: &mut EnrollmentFlow,
    phone: Option<String>,
    device_name: Option<String>,
    pubkey: Option<String>,
) -> Result<()> {
    loop {
        print_step(flow.session());
        let Some(step) = flow.session().current_step() else {
            return Err(FlowError::NotStarted.into());
        };

        match step {
            EnrollmentStep::Welcome => {
                flow.advance()?;
            }
            EnrollmentStep::DataVerification => {
                if let Some(user) = flow.payload().map(|p| p.user) {
                    println!("  Name:  {}", user.full_name());
                    println!("  Login: {}", user.login);
                    println!("  Email: {}", user.email);
                }
                if !confirm("Is this correct?")? {
                    println!("Contact your administrator to correct your data.");
                    return Ok(());
                }
                flow.advance()?;
            }
            EnrollmentStep::Password => {
                let password = prompt("New password")?;
                flow.activate_user(&password, phone.as_deref()).await?;
            }
            EnrollmentStep::Device => {
                let optional = flow
                    .payload()
                    .is_some_and(|p| p.settings.vpn_setup_optional);
                let name = match &device_name {
                    Some(name) => name.clone(),
                    None if optional => prompt("Device name (empty to skip)")?,
                    None => prompt("Device name")?,
                };
                if name.trim().is_empty() && optional {
                    flow.advance()?;
                    continue;
                }
                let key = match &pubkey {
                    Some(key) => key.clone(),
                    None => prompt("WireGuard public key")?,
                };
                let device = flow.create_device(&name, &key).await?;
                for config in &device.configs {
                    println!();
                    println!("# {}", config.network_name);
                    println!("{}", config.config);
                }
            }
            EnrollmentStep::Finish => {
                let content = flow.finish()?;
                println!();
                println!("{content}");
                return Ok(());
            }
        }
    }
}

fn cmd_enroll_status(config: &Config) -> Result<()> {
    let session: WizardSession<EnrollmentStep> =
        open_session(config, &config.wizard.enrollment_key, Route::Enrollment)?;
    print_status(&session);
    Ok(())
}

fn cmd_enroll_reset(config: &Config) -> Result<()> {
    let mut session: WizardSession<EnrollmentStep> =
        open_session(config, &config.wizard.enrollment_key, Route::Enrollment)?;
    session.reset()?;
    println!("Enrollment session cleared");
    Ok(())
}

fn print_status<S: WizardStep>(session: &WizardSession<S>) {
    if session.navigator().current() == Route::SessionExpired {
        println!("Session expired");
        return;
    }
    let Some(payload) = session.payload() else {
        println!("No active session");
        return;
    };

    println!("User: {} ({})", payload.user().full_name(), payload.user().login);
    print_step(session);
    println!("Time left: {}", session.time_left_display());
}

async fn cmd_password_request(config: &Config, email: &str) -> Result<()> {
    let session = open_session(config, &config.wizard.password_reset_key, Route::PasswordReset)?;
    let mut flow = PasswordResetFlow::new(proxy(config)?, session);

    flow.request(email).await?;
    println!("If an account exists for {}, a reset link is on its way.", email.trim());
    Ok(())
}

async fn cmd_password_run(config: &Config, token: &str) -> Result<()> {
    let session = open_session(config, &config.wizard.password_reset_key, Route::Home)?;
    let mut flow = PasswordResetFlow::new(proxy(config)?, session);

    let payload = match flow.start(token).await {
        Ok(payload) => payload,
        Err(FlowError::Api(e)) => {
            tracing::debug!(error = %e, "reset link rejected");
            println!("This reset link is invalid or has expired. Request a new one.");
            return Ok(());
        }
        Err(e) => return report(e),
    };

    println!("Resetting password for {}", payload.user().login);
    println!("Session time left: {}", flow.session().time_left_display());
    print_step(flow.session());

    let password = prompt("New password")?;
    if let Err(e) = flow.reset_password(&password).await {
        return report(e);
    }
    if flow.session().current_step() == Some(PasswordResetStep::Success) {
        flow.finish()?;
        println!("Password changed. You can now log in with your new password.");
    }
    Ok(())
}

fn cmd_password_status(config: &Config) -> Result<()> {
    let session: WizardSession<PasswordResetStep> =
        open_session(config, &config.wizard.password_reset_key, Route::PasswordReset)?;
    match pending_step(&session) {
        Some(step) => println!("Step: {}", step.label()),
        None => print_status(&session),
    }
    Ok(())
}

/// Pre-session step of the reset wizard (email form, link sent, failure).
/// An expired session has none.
fn pending_step(session: &WizardSession<PasswordResetStep>) -> Option<PasswordResetStep> {
    if session.navigator().current() == Route::SessionExpired || session.is_started() {
        return None;
    }
    session.current_step()
}

fn cmd_password_reset(config: &Config) -> Result<()> {
    let mut session: WizardSession<PasswordResetStep> =
        open_session(config, &config.wizard.password_reset_key, Route::PasswordReset)?;
    session.reset()?;
    println!("Password reset session cleared");
    Ok(())
}

async fn cmd_openid_auth_info(config: &Config, mfa: bool, state: Option<&str>) -> Result<()> {
    let flow = OpenIdFlow::new(proxy(config)?);
    let flow_type = if mfa {
        OpenIdFlowType::Mfa
    } else {
        OpenIdFlowType::Enrollment
    };

    match flow.auth_info(flow_type, state).await? {
        Some(info) => {
            println!("{}", info.button_display_name);
            println!("{}", info.url);
        }
        None => println!("OpenID is not configured on this proxy"),
    }
    Ok(())
}

async fn cmd_openid_callback(config: &Config, code: &str, state: &str, mfa: bool) -> Result<()> {
    let flow = OpenIdFlow::new(proxy(config)?);
    let params = CallbackParams::parse(code, state)?;

    if mfa {
        flow.mfa_callback(params).await?;
        println!("MFA login confirmed. Return to your VPN client.");
        return Ok(());
    }

    let response = flow.enrollment_callback(params).await?;
    println!("Login accepted. Continue enrollment with:");
    println!("  enrollment-wizard enroll run --token {}", response.token);
    println!("Proxy: {}", response.url);
    Ok(())
}

async fn cmd_info(config: &Config) -> Result<()> {
    let info = proxy(config)?.app_info().await?;
    println!("Proxy version: {}", info.version);
    Ok(())
}

fn cmd_init(config: &Config) -> Result<()> {
    config.save()?;
    println!("Wrote {}", Config::local_config_path().display());
    Ok(())
}
