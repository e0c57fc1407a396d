use clap::{Parser, Subcommand};
use docqa::Result;
use docqa::commands::{
    ask, check, create_session, delete_document, delete_session, history, list_documents,
    list_sessions, show_status, upload,
};
use docqa::config::{get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Question answering over your own documents, backed by Ollama and LanceDB")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, metadata.db and the vector index (default: ~/.docqa)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Upload a PDF, DOCX, image or text file and index it
    Upload {
        #[arg(long)]
        user: i64,
        file: PathBuf,
    },
    /// List a user's documents and their indexing status
    Documents {
        #[arg(long)]
        user: i64,
    },
    /// Delete a document and its indexed chunks
    DeleteDocument {
        #[arg(long)]
        user: i64,
        id: i64,
    },
    /// Manage chat sessions
    #[command(subcommand)]
    Session(SessionCommands),
    /// Ask a question in a chat session
    Ask {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        session: i64,
        /// Print the answer and its context as JSON
        #[arg(long)]
        json: bool,
        question: String,
    },
    /// Show the messages of a chat session
    History {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        session: i64,
    },
    /// Show detailed status of the stores and the Ollama server
    Status,
    /// Check that the vector index matches the documents table
    Check {
        /// Remove chunks whose document no longer exists
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a session, optionally restricted to some documents
    Create {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        name: Option<String>,
        /// Document to link; repeat for several. No documents means all of the user's documents.
        #[arg(long = "document")]
        documents: Vec<i64>,
    },
    List {
        #[arg(long)]
        user: i64,
    },
    Delete {
        #[arg(long)]
        user: i64,
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Upload { user, file } => {
            upload(&config_dir, user, &file).await?;
        }
        Commands::Documents { user } => {
            list_documents(&config_dir, user).await?;
        }
        Commands::DeleteDocument { user, id } => {
            delete_document(&config_dir, user, id).await?;
        }
        Commands::Session(SessionCommands::Create {
            user,
            name,
            documents,
        }) => {
            create_session(&config_dir, user, name, documents).await?;
        }
        Commands::Session(SessionCommands::List { user }) => {
            list_sessions(&config_dir, user).await?;
        }
        Commands::Session(SessionCommands::Delete { user, id }) => {
            delete_session(&config_dir, user, id).await?;
        }
        Commands::Ask {
            user,
            session,
            json,
            question,
        } => {
            ask(&config_dir, user, session, &question, json).await?;
        }
        Commands::History { user, session } => {
            history(&config_dir, user, session).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
        Commands::Check { fix } => {
            check(&config_dir, fix).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn documents_command() {
        let cli = Cli::try_parse_from(["docqa", "documents", "--user", "3"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Documents { user: 3 }));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn upload_command_with_file() {
        let cli = Cli::try_parse_from(["docqa", "upload", "--user", "3", "lease.pdf"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Upload { user, file } = parsed.command {
                assert_eq!(user, 3);
                assert_eq!(file, PathBuf::from("lease.pdf"));
            }
        }
    }

    #[test]
    fn global_config_dir_after_subcommand() {
        let cli = Cli::try_parse_from([
            "docqa",
            "status",
            "--config-dir",
            "/tmp/docqa-test",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/docqa-test")));
            assert!(matches!(parsed.command, Commands::Status));
        }
    }

    #[test]
    fn session_create_with_documents() {
        let cli = Cli::try_parse_from([
            "docqa",
            "session",
            "create",
            "--user",
            "3",
            "--name",
            "Lease review",
            "--document",
            "7",
            "--document",
            "9",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Session(SessionCommands::Create {
                user,
                name,
                documents,
            }) = parsed.command
            {
                assert_eq!(user, 3);
                assert_eq!(name, Some("Lease review".to_string()));
                assert_eq!(documents, vec![7, 9]);
            }
        }
    }

    #[test]
    fn ask_command_with_json() {
        let cli = Cli::try_parse_from([
            "docqa",
            "ask",
            "--user",
            "3",
            "--session",
            "1",
            "--json",
            "What is the rent?",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask {
                user,
                session,
                json,
                question,
            } = parsed.command
            {
                assert_eq!((user, session), (3, 1));
                assert!(json);
                assert_eq!(question, "What is the rent?");
            }
        }
    }

    #[test]
    fn ask_requires_session() {
        let cli = Cli::try_parse_from(["docqa", "ask", "--user", "3", "question"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn check_fix_flag() {
        let cli = Cli::try_parse_from(["docqa", "check", "--fix"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Check { fix: true }));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["docqa", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["docqa", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["docqa", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
