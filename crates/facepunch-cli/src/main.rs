mod setup;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facepunch", about = "Facepunch face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download ONNX models required for detection and recognition
    Setup {
        /// Directory to store models (defaults to FACEPUNCH_MODEL_DIR or the data dir)
        #[arg(long)]
        model_dir: Option<String>,
    },
    /// Manage identities
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    /// Enroll face images for an identity
    Enroll {
        /// External identity id
        id: String,
        /// Image files, one face each
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Angle label per image, in order (e.g. front, left, right)
        #[arg(short, long)]
        angle: Vec<String>,
    },
    /// List stored face embeddings of an identity
    Faces { id: String },
    /// Delete all stored face embeddings of an identity
    ClearFaces { id: String },
    /// Identify the face in an image without recording anything
    Recognize { image: PathBuf },
    /// Open a liveness session for multi-burst checks
    Session,
    /// Run liveness detection on a burst of frames
    Liveness {
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Session id from `facepunch session`
        #[arg(long)]
        session: Option<String>,
    },
    /// Identify, check liveness and record a punch
    Punch {
        /// Image used for identification
        image: PathBuf,
        /// Burst frame for liveness (repeat for each frame)
        #[arg(short, long = "frame", required = true)]
        frames: Vec<PathBuf>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Show attendance history, newest first
    History {
        #[arg(long)]
        identity: Option<String>,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show today's attendance counts
    Today,
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Register a new identity
    Add { id: String, name: String },
    /// List identities
    List {
        /// Include deactivated identities
        #[arg(long)]
        all: bool,
    },
    /// Deactivate an identity; its history is kept
    Remove { id: String },
}

#[zbus::proxy(
    interface = "org.facepunch.Attendance1",
    default_service = "org.facepunch.Attendance1",
    default_path = "/org/facepunch/Attendance1"
)]
trait Attendance {
    async fn create_identity(&self, id: &str, name: &str) -> zbus::Result<String>;
    async fn deactivate_identity(&self, id: &str) -> zbus::Result<bool>;
    async fn list_identities(&self, include_inactive: bool) -> zbus::Result<String>;
    async fn register_faces(
        &self,
        id: &str,
        images: Vec<Vec<u8>>,
        angles: Vec<String>,
    ) -> zbus::Result<String>;
    async fn list_faces(&self, id: &str) -> zbus::Result<String>;
    async fn clear_faces(&self, id: &str) -> zbus::Result<u32>;
    async fn recognize(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn start_liveness_session(&self) -> zbus::Result<String>;
    async fn liveness_check(&self, frames: Vec<Vec<u8>>, session: &str) -> zbus::Result<String>;
    async fn punch(
        &self,
        image: Vec<u8>,
        frames: Vec<Vec<u8>>,
        session: &str,
    ) -> zbus::Result<String>;
    async fn history(&self, filter: &str) -> zbus::Result<String>;
    async fn today_stats(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon's bus; `FACEPUNCH_SESSION_BUS` selects the session bus.
async fn connect() -> Result<AttendanceProxy<'static>> {
    let conn = if std::env::var_os("FACEPUNCH_SESSION_BUS").is_some() {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("facepunchd is not reachable")
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_all(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths.iter().map(|p| read_file(p)).collect()
}

/// Pretty-print a JSON reply.
fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print the result of a pipeline reply, or fail with its rejection message.
fn print_outcome(reply: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    if value["success"] == true {
        println!("{}", serde_json::to_string_pretty(&value["result"])?);
        return Ok(());
    }
    let message = value["message"].as_str().unwrap_or("request rejected");
    let code = value["code"].as_str().unwrap_or("unknown");
    match &value["detail"] {
        serde_json::Value::Null => bail!("{message} ({code})"),
        detail => bail!("{message} ({code}): {detail}"),
    }
}

fn history_filter(
    identity: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    offset: u32,
    limit: u32,
) -> Result<String> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            bail!("--from {from} is after --to {to}");
        }
    }
    Ok(serde_json::json!({
        "identity": identity,
        "from": from,
        "to": to,
        "offset": offset,
        "limit": limit,
    })
    .to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { model_dir } => setup::run(model_dir),
        command => remote(command).await,
    }
}

/// Run a command that talks to facepunchd.
async fn remote(command: Commands) -> Result<()> {
    let proxy = connect().await?;

    match command {
        Commands::Setup { .. } => bail!("setup runs locally"),
        Commands::Identity { action } => match action {
            IdentityAction::Add { id, name } => {
                print_json(&proxy.create_identity(&id, &name).await?)?;
            }
            IdentityAction::List { all } => {
                print_json(&proxy.list_identities(all).await?)?;
            }
            IdentityAction::Remove { id } => {
                if proxy.deactivate_identity(&id).await? {
                    println!("Identity {id} deactivated");
                } else {
                    bail!("no active identity {id}");
                }
            }
        },
        Commands::Enroll { id, images, angle } => {
            if angle.len() > images.len() {
                bail!("{} angle labels for {} images", angle.len(), images.len());
            }
            let bytes = read_all(&images)?;
            tracing::debug!(id, images = bytes.len(), "sending enrollment");
            print_json(&proxy.register_faces(&id, bytes, angle).await?)?;
        }
        Commands::Faces { id } => {
            print_json(&proxy.list_faces(&id).await?)?;
        }
        Commands::ClearFaces { id } => {
            let removed = proxy.clear_faces(&id).await?;
            println!("Removed {removed} face embedding(s) of {id}");
        }
        Commands::Recognize { image } => {
            print_outcome(&proxy.recognize(read_file(&image)?).await?)?;
        }
        Commands::Session => {
            println!("{}", proxy.start_liveness_session().await?);
        }
        Commands::Liveness { frames, session } => {
            let frames = read_all(&frames)?;
            let session = session.unwrap_or_default();
            print_json(&proxy.liveness_check(frames, &session).await?)?;
        }
        Commands::Punch {
            image,
            frames,
            session,
        } => {
            let image = read_file(&image)?;
            let frames = read_all(&frames)?;
            let session = session.unwrap_or_default();
            print_outcome(&proxy.punch(image, frames, &session).await?)?;
        }
        Commands::History {
            identity,
            from,
            to,
            offset,
            limit,
        } => {
            let filter = history_filter(identity, from, to, offset, limit)?;
            print_json(&proxy.history(&filter).await?)?;
        }
        Commands::Today => {
            print_json(&proxy.today_stats().await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_punch_args() {
        let cli = Cli::try_parse_from([
            "facepunch", "punch", "face.jpg", "-f", "a.jpg", "--frame", "b.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Punch {
                image,
                frames,
                session,
            } => {
                assert_eq!(image, PathBuf::from("face.jpg"));
                assert_eq!(frames.len(), 2);
                assert!(session.is_none());
            }
            _ => panic!("expected punch"),
        }
    }

    #[test]
    fn test_punch_requires_frames() {
        assert!(Cli::try_parse_from(["facepunch", "punch", "face.jpg"]).is_err());
    }

    #[test]
    fn test_history_dates_parse() {
        let cli = Cli::try_parse_from(["facepunch", "history", "--from", "2024-03-01"]).unwrap();
        match cli.command {
            Commands::History { from, limit, .. } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 3, 1));
                assert_eq!(limit, 50);
            }
            _ => panic!("expected history"),
        }
        assert!(Cli::try_parse_from(["facepunch", "history", "--from", "03/01/2024"]).is_err());
    }

    #[test]
    fn test_history_filter_json() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1);
        let filter: serde_json::Value =
            serde_json::from_str(&history_filter(Some("E1".into()), from, None, 10, 5).unwrap())
                .unwrap();
        assert_eq!(filter["identity"], "E1");
        assert_eq!(filter["from"], "2024-03-01");
        assert!(filter["to"].is_null());
        assert_eq!(filter["offset"], 10);

        let to = NaiveDate::from_ymd_opt(2024, 2, 1);
        assert!(history_filter(None, from, to, 0, 50).is_err());
    }

    #[test]
    fn test_rejection_becomes_error() {
        let reply = r#"{"success":false,"code":"too_soon","message":"Too soon to punch out","detail":{"remaining_hours":3}}"#;
        let err = print_outcome(reply).unwrap_err().to_string();
        assert!(err.contains("too_soon"));
        assert!(err.contains("\"remaining_hours\":3"));

        let reply = r#"{"success":false,"code":"no_face","message":"No face detected in the image","detail":null}"#;
        let err = print_outcome(reply).unwrap_err().to_string();
        assert_eq!(err, "No face detected in the image (no_face)");

        assert!(print_outcome(r#"{"success":true,"result":{}}"#).is_ok());
    }
}
