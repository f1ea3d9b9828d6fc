use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use smartchat::command::{ChatCommand, parse_chat_command};
use smartchat::llm::{Orchestrator, Reply, create_orchestrator};
use smartchat::{Config, render};

#[derive(Parser)]
#[command(name = "smartchat", about = "Game-master assistant for tabletop roleplaying chats")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the answer.
    Ask {
        /// Print the answer converted to HTML.
        #[arg(long)]
        html: bool,

        /// Conversation the question belongs to (keeps thread and history).
        #[arg(long, default_value = "default")]
        conversation: String,

        /// The question.
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Read chat lines from stdin and answer `/?` and `/w gpt` commands.
    Repl {
        /// Print answers converted to HTML.
        #[arg(long)]
        html: bool,

        /// Conversation all questions belong to.
        #[arg(long, default_value = "default")]
        conversation: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smartchat=info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;
    let orchestrator = create_orchestrator(&config)?;

    match cli.command {
        Commands::Ask {
            html,
            conversation,
            question,
        } => {
            let question = question.join(" ");
            let reply = orchestrator.respond(&conversation, &question).await?;
            print_reply(&reply, html, &[]);
        }
        Commands::Repl { html, conversation } => {
            repl(&orchestrator, &conversation, html).await?;
        }
    }

    Ok(())
}

async fn repl(orchestrator: &Orchestrator, conversation: &str, html: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_chat_command(&line) else {
            tracing::debug!("Ignoring chat line not addressed to the assistant");
            continue;
        };
        if command.question().is_empty() {
            continue;
        }

        let recipients = match &command {
            ChatCommand::Public { .. } => Vec::new(),
            ChatCommand::Whisper { recipients, .. } => recipients.clone(),
        };
        match orchestrator.respond(conversation, command.question()).await {
            Ok(reply) => print_reply(&reply, html, &recipients),
            Err(err) => eprintln!("error: {err}"),
        }
    }

    Ok(())
}

fn print_reply(reply: &Reply, html: bool, recipients: &[String]) {
    if let Some(notice) = reply.notice() {
        eprintln!("notice: {notice}");
    }
    let text = if html {
        render::to_html(&reply.text)
    } else {
        reply.text.clone()
    };
    if recipients.is_empty() {
        println!("{text}");
    } else {
        println!("[to {}] {text}", recipients.join(", "));
    }
}
