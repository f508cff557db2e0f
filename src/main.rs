use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};

use tiowicho_points::models::customers::{Customer, CustomerLookup};
use tiowicho_points::models::identifiers::CustomerId;
use tiowicho_points::models::transactions::Transaction;
use tiowicho_points::services::customers::CustomerHistory;
use tiowicho_points::services::points;
use tiowicho_points::services::session::{Mutation, Outcome};
use tiowicho_points::services::{self, ServiceError, ServiceHandles};
use tiowicho_points::settings::Settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new customer and print their QR token
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Look a customer up by QR token or phone
    Lookup {
        #[arg(long, conflicts_with = "phone", required_unless_present = "phone")]
        token: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Search customers by name
    Search { query: String },
    /// Show a customer's transactions
    History { customer_id: CustomerId },
    /// Record a purchase and print the new balance
    Purchase {
        #[arg(long)]
        token: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Redeem points and print the new balance
    Redeem {
        #[arg(long)]
        token: String,
        #[arg(long)]
        points: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show the points a purchase would earn
    Preview {
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 0)]
        balance: i64,
    },
    /// Interactive waiter terminal
    Terminal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log4rs)?;

    let settings = Settings::load(&args.config)?;
    let handles = services::start_services(&settings)?;

    if let Err(e) = run(args.command, &handles).await {
        log::error!("{}", e);
        eprintln!("[{}] {}", e.code(), e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new(path).exists() {
        let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(Root::builder().appender("stderr").build(LevelFilter::Warn))?;
        log4rs::init_config(config)?;
        return Ok(());
    }

    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    log4rs::init_file(path, Default::default())
        .map_err(|e| anyhow::anyhow!("Could not initialize logging: {}", e))
}

async fn run(command: Command, handles: &ServiceHandles) -> Result<(), ServiceError> {
    match command {
        Command::Register { name, phone, email } => {
            let registration = handles.register(name, phone, email).await?;
            print_customer(&registration.customer);
            println!("QR: {}", registration.token);
        }
        Command::Lookup { token, phone } => {
            let lookup = token
                .map(CustomerLookup::Token)
                .or(phone.map(CustomerLookup::Phone))
                .ok_or(points::ValidationError::MissingField("telefono"))?;
            if let Some(customer) = handles.open(lookup).await? {
                print_customer(&customer);
            }
        }
        Command::Search { query } => {
            let customers = handles.search(query).await?;
            if customers.is_empty() {
                println!("No customers found.");
            }
            for customer in &customers {
                print_summary(customer);
            }
        }
        Command::History { customer_id } => {
            let history = handles.history(customer_id).await?;
            print_history(&history);
        }
        Command::Purchase {
            token,
            amount,
            description,
        } => {
            let amount = points::parse_amount(&amount)?;
            handles.open(CustomerLookup::Token(token)).await?;
            report(
                handles
                    .submit(Mutation::Purchase {
                        amount,
                        description,
                    })
                    .await?,
            );
        }
        Command::Redeem {
            token,
            points: raw,
            description,
        } => {
            let requested = points::parse_points(&raw)?;
            handles.open(CustomerLookup::Token(token)).await?;
            report(
                handles
                    .submit(Mutation::Redemption {
                        points: requested,
                        description,
                    })
                    .await?,
            );
        }
        Command::Preview { amount, balance } => {
            let amount = points::parse_amount(&amount)?;
            print_preview(amount, balance)?;
        }
        Command::Terminal => terminal(handles).await,
    }

    Ok(())
}

const TERMINAL_HELP: &str = "\
scan <token>             open a customer by QR token
phone <number>           open a customer by phone
use <id>                 open a customer by id
search <name>            search customers by name
show                     show the open customer
add <amount> [desc]      record a purchase
redeem <points> [desc]   redeem points
all [desc]               redeem every available point
history                  show the open customer's transactions
close                    close the open customer
quit                     leave the terminal";

async fn terminal(handles: &ServiceHandles) {
    println!("Tio Wicho points terminal. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Could not read from stdin: {}", e);
                break;
            }
        };

        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let result = match command {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("{}", TERMINAL_HELP);
                Ok(())
            }
            "scan" => open(handles, CustomerLookup::Token(rest.to_string())).await,
            "phone" => open(handles, CustomerLookup::Phone(rest.to_string())).await,
            "use" => match rest.parse::<CustomerId>() {
                Ok(id) => open(handles, CustomerLookup::Id(id)).await,
                Err(e) => Err(e.into()),
            },
            "search" => match handles.search(rest.to_string()).await {
                Ok(customers) => {
                    customers.iter().for_each(print_summary);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "show" => show(handles).await,
            "add" => add(handles, rest).await,
            "redeem" => redeem(handles, rest).await,
            "all" => redeem_all(handles, rest).await,
            "history" => history(handles).await,
            "close" => handles.abandon().await,
            other => {
                println!("Unknown command {:?}. Type 'help'.", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("[{}] {}", e.code(), e);
        }
    }

    let _ = handles.abandon().await;
}

async fn current(handles: &ServiceHandles) -> Result<Customer, ServiceError> {
    handles
        .view()
        .await?
        .customer
        .ok_or_else(|| points::ValidationError::NoActiveCustomer.into())
}

async fn open(handles: &ServiceHandles, lookup: CustomerLookup) -> Result<(), ServiceError> {
    if let Some(customer) = handles.open(lookup).await? {
        print_customer(&customer);
    }
    Ok(())
}

async fn show(handles: &ServiceHandles) -> Result<(), ServiceError> {
    let view = handles.view().await?;
    match view.customer {
        Some(customer) => print_customer(&customer),
        None => println!("No customer open."),
    }
    Ok(())
}

async fn add(handles: &ServiceHandles, args: &str) -> Result<(), ServiceError> {
    let (raw, description) = args.split_once(' ').unwrap_or((args, ""));
    let amount = points::parse_amount(raw)?;
    let customer = current(handles).await?;
    print_preview(amount, customer.points)?;

    let outcome = handles
        .submit(Mutation::Purchase {
            amount,
            description: description.trim().to_string(),
        })
        .await?;
    report(outcome);
    Ok(())
}

async fn redeem(handles: &ServiceHandles, args: &str) -> Result<(), ServiceError> {
    let (raw, description) = args.split_once(' ').unwrap_or((args, ""));
    let customer = current(handles).await?;
    let requested = points::validate_redemption_input(raw, customer.points)?;
    let preview = points::preview_redemption(requested, customer.points)?;
    println!(
        "Redeeming {} points (about {} left afterwards).",
        preview.points, preview.projected_balance
    );
    submit_redemption(handles, requested, description).await
}

async fn redeem_all(handles: &ServiceHandles, description: &str) -> Result<(), ServiceError> {
    let customer = current(handles).await?;
    if customer.points <= 0 {
        println!("{} has no points to redeem.", customer.name);
        return Ok(());
    }
    submit_redemption(handles, customer.points, description).await
}

async fn submit_redemption(
    handles: &ServiceHandles,
    requested: i64,
    description: &str,
) -> Result<(), ServiceError> {
    let outcome = handles
        .submit(Mutation::Redemption {
            points: requested,
            description: description.trim().to_string(),
        })
        .await?;
    report(outcome);
    Ok(())
}

async fn history(handles: &ServiceHandles) -> Result<(), ServiceError> {
    let customer = current(handles).await?;
    let history = handles.history(customer.id).await?;
    print_history(&history);
    Ok(())
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Applied {
            transaction,
            customer,
        } => {
            if transaction.points_earned > 0 {
                println!("+{} points.", transaction.points_earned);
            }
            if transaction.points_used > 0 {
                println!("-{} points.", transaction.points_used);
            }
            println!("{} now has {} points.", customer.name, customer.points);
        }
        Outcome::Discarded => println!("Session closed before the ledger answered."),
    }
}

fn print_preview(amount: Decimal, balance: i64) -> Result<(), ServiceError> {
    let preview = points::preview_purchase(amount, balance)?;
    println!(
        "Purchase ${:.2} earns +{} points (about {} afterwards).",
        preview.amount, preview.points, preview.projected_balance
    );
    Ok(())
}

fn print_customer(customer: &Customer) {
    println!("{} (id {})", customer.name, customer.id);
    println!("  phone:  {}", customer.phone);
    println!(
        "  email:  {}",
        customer.email.as_deref().unwrap_or("not provided")
    );
    println!("  points: {}", customer.points);
    println!("  since:  {}", customer.registered_at.format("%Y-%m-%d"));
    println!("  token:  {}", customer.token());
    if let Some(url) = &customer.qr_image_url {
        println!("  qr:     {}", url);
    }
}

fn print_summary(customer: &Customer) {
    println!(
        "{:>6}  {:<30} {:<14} {:>6} pts",
        customer.id.as_str(),
        customer.name,
        customer.phone,
        customer.points
    );
}

fn print_transaction(transaction: &Transaction) {
    let kind = transaction.kind.map(|k| k.label()).unwrap_or("?");
    let when = transaction
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let balance = transaction
        .balance_after
        .map(|b| b.to_string())
        .unwrap_or_default();

    println!(
        "{:<16} {:<7} {:>+6} {:>6}  {}",
        when,
        kind,
        transaction.points_delta(),
        balance,
        transaction.description.as_deref().unwrap_or("")
    );
}

fn print_history(history: &CustomerHistory) {
    println!(
        "{}: {} points, {} transactions ({} purchases, {} redemptions)",
        history.customer.name,
        history.customer.points,
        history.transactions.len(),
        history.purchases(),
        history.redemptions()
    );
    history.transactions.iter().for_each(print_transaction);
}
