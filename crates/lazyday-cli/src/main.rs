//! Lazy Days - command line client for the spa's appointment calendar.
//!
//! Every command builds the same cache-backed app the UI would use, runs one
//! operation through the synchronized hooks and prints the notifications it
//! produced.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lazyday_core::cache::{QueryKey, QueryStatus};
use lazyday_core::hooks::PatchOutcome;
use lazyday_core::models::{Appointment, AppointmentDateMap, MonthYear};
use lazyday_core::notify::{ChannelNotifier, Toast};
use lazyday_core::{App, Config};

/// Environment variable holding the sign-in password
const PASSWORD_ENV: &str = "LAZYDAY_PASSWORD";

/// How many months `reserve` searches for an appointment id
const RESERVE_SEARCH_MONTHS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "lazyday")]
#[command(about = "Book and manage Lazy Days appointments")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the appointment calendar
    Calendar {
        /// Include slots booked by other people
        #[arg(short, long)]
        all: bool,
        /// Number of months to show, starting with the current one
        #[arg(short, long, default_value_t = 1)]
        months: u32,
    },
    /// Sign in
    Login {
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Create an account and sign in
    Signup {
        #[arg(short, long)]
        email: String,
    },
    /// Sign out and forget the stored user
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Update profile fields
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// Reserve an open appointment by id
    Reserve { id: i64 },
    /// Cancel one of your appointments by id
    Cancel { id: i64 },
    /// List your appointments
    Mine,
}

/// Initialize the tracing subscriber: stderr plus a daily log file.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lazyday.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing(&Config::load().unwrap_or_default());
    info!(command = ?args.command, "lazyday starting");

    let (notifier, mut toasts) = ChannelNotifier::new();
    let mut app = App::new(Arc::new(notifier))?;
    let today = Local::now().date_naive();

    let result = run(&mut app, args.command, today).await;
    // Let the error reporter turn any last fetch failure into a toast
    tokio::task::yield_now().await;
    print_toasts(&mut toasts);
    result
}

async fn run(app: &mut App, command: Command, today: NaiveDate) -> Result<()> {
    match command {
        Command::Calendar { all, months } => calendar(app, today, all, months).await,
        Command::Login { email } => {
            let email = match email.or_else(|| app.config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = password()?;
            if app.auth().sign_in(&email, &password).await.is_some() {
                app.remember_email(&email);
            }
            Ok(())
        }
        Command::Signup { email } => {
            let password = password()?;
            if app.auth().sign_up(&email, &password).await.is_some() {
                app.remember_email(&email);
            }
            Ok(())
        }
        Command::Logout => {
            app.auth().sign_out();
            Ok(())
        }
        Command::Whoami => {
            app.ctx.cache.fetch(&QueryKey::User).await;
            match app.user.user() {
                Some(user) => println!("{} <{}>", user.display_name(), user.email),
                None => println!("Not signed in"),
            }
            Ok(())
        }
        Command::Profile {
            name,
            phone,
            address,
        } => {
            let Some(mut user) = app.user.user() else {
                bail!("Not signed in");
            };
            if name.is_some() {
                user.name = name;
            }
            if phone.is_some() {
                user.phone = phone;
            }
            if address.is_some() {
                user.address = address;
            }
            if let PatchOutcome::Committed(user) = app.patch_user().mutate(Some(user)).await {
                println!("{} <{}>", user.display_name(), user.email);
            }
            Ok(())
        }
        Command::Reserve { id } => {
            let Some(user) = app.user.user() else {
                bail!("Not signed in");
            };
            let Some(appointment) = find_open(app, today, id).await else {
                bail!("No open appointment with id {}", id);
            };
            app.appointment_mutations().reserve(&appointment, &user).await;
            Ok(())
        }
        Command::Cancel { id } => {
            let mine = my_appointments(app).await?;
            let Some(appointment) = mine.into_iter().find(|a| a.id == id) else {
                bail!("You have no appointment with id {}", id);
            };
            app.appointment_mutations().cancel(&appointment).await;
            Ok(())
        }
        Command::Mine => {
            let mine = my_appointments(app).await?;
            if mine.is_empty() {
                println!("No appointments");
            }
            let user_id = app.user.user().map(|u| u.id);
            for appointment in &mine {
                println!("{}", format_appointment(appointment, user_id));
            }
            Ok(())
        }
    }
}

async fn calendar(app: &App, today: NaiveDate, all: bool, months: u32) -> Result<()> {
    let mut hook = app.appointments(today);
    hook.set_show_all(all);
    let user_id = app.user.user().map(|u| u.id);

    for i in 0..months.max(1) {
        if i > 0 {
            hook.update_month_year(1);
            println!();
        }
        let entry = app.ctx.cache.fetch(&month_key(hook.month_year())).await;
        println!("{}", hook.month_year());
        if entry.status == QueryStatus::Error {
            println!("  (could not load appointments)");
        }
        print_month(&hook.appointments(), user_id);
    }
    Ok(())
}

async fn find_open(app: &App, today: NaiveDate, id: i64) -> Option<Appointment> {
    let mut month = MonthYear::containing(today);
    for _ in 0..RESERVE_SEARCH_MONTHS {
        let key = month_key(&month);
        app.ctx.cache.fetch(&key).await;
        let found = app
            .ctx
            .cache
            .get_data(&key)
            .and_then(|data| data.into_appointments())
            .and_then(|map| map.into_values().flatten().find(|a| a.id == id));
        if let Some(appointment) = found {
            return appointment.is_open().then_some(appointment);
        }
        month = month.next();
    }
    None
}

async fn my_appointments(app: &App) -> Result<Vec<Appointment>> {
    let Some(user) = app.user.user() else {
        bail!("Not signed in");
    };
    let mut hook = app.user_appointments();
    app.ctx
        .cache
        .fetch(&QueryKey::UserAppointments { user_id: user.id })
        .await;
    Ok(hook.appointments())
}

fn month_key(month_year: &MonthYear) -> QueryKey {
    QueryKey::appointments(month_year.year, month_year.month)
}

fn print_month(appointments: &AppointmentDateMap, user_id: Option<i64>) {
    let mut any = false;
    for list in appointments.values() {
        for appointment in list {
            any = true;
            println!("  {}", format_appointment(appointment, user_id));
        }
    }
    if !any {
        println!("  No appointments");
    }
}

fn format_appointment(appointment: &Appointment, user_id: Option<i64>) -> String {
    let when = appointment
        .date_time
        .with_timezone(&Local)
        .format("%a %b %e %H:%M");
    let state = if appointment.is_open() {
        "open"
    } else if user_id.is_some_and(|id| appointment.is_booked_by(id)) {
        "yours"
    } else {
        "booked"
    };
    format!(
        "#{:<4} {}  {:<20} {}",
        appointment.id, when, appointment.treatment_name, state
    )
}

fn print_toasts(toasts: &mut UnboundedReceiver<Toast>) {
    while let Ok(toast) = toasts.try_recv() {
        println!("[{}] {}", toast.status, toast.title);
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn password() -> Result<String> {
    match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => Ok(rpassword::prompt_password("Password: ")?),
    }
}
