use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kiosk", about = "Attendance kiosk CLI")]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "KIOSK_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Admin username
    #[arg(long, env = "KIOSK_ADMIN_USER", default_value = "admin")]
    user: String,

    /// Admin password
    #[arg(long, env = "KIOSK_ADMIN_PASSWORD", default_value = "admin", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health and today's attendance stats
    Status,
    /// List enrolled employees
    Employees,
    /// Enroll an employee from a photo
    Enroll {
        /// Unique employee ID
        id: String,
        /// Full name
        name: String,
        /// Photo containing exactly one frontal face
        image: PathBuf,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        address: String,
    },
    /// Submit an image as a kiosk frame and print the detections
    Process {
        image: PathBuf,
    },
    /// Manage CCTV cameras
    Cameras {
        #[command(subcommand)]
        action: CameraAction,
    },
    /// Export attendance as CSV
    Report {
        /// day, month or year
        #[arg(long = "type", default_value = "day")]
        granularity: String,
        /// Reference date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Output file; defaults to the server-suggested filename
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CameraAction {
    /// List configured cameras
    List,
    /// Add a camera
    Add { name: String, url: String },
    /// Remove a camera by ID
    Remove { id: u32 },
}

struct Client {
    agent: ureq::Agent,
    base: String,
    auth: String,
}

impl Client {
    fn new(cli: &Cli) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();
        let auth = format!("Basic {}", STANDARD.encode(format!("{}:{}", cli.user, cli.password)));
        Self {
            agent,
            base: cli.url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn get(&self, path: &str) -> Result<Value> {
        let request = self.agent.get(&format!("{}{path}", self.base)).set("Authorization", &self.auth);
        read(request.call())
    }

    fn post(&self, path: &str, body: Value) -> Result<Value> {
        let request = self.agent.post(&format!("{}{path}", self.base)).set("Authorization", &self.auth);
        read(request.send_json(body))
    }

    fn delete(&self, path: &str) -> Result<Value> {
        let request = self.agent.delete(&format!("{}{path}", self.base)).set("Authorization", &self.auth);
        read(request.call())
    }
}

/// Decode a JSON reply, turning error statuses into their `message`.
fn read(result: Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) => response.into_json().context("invalid response from kioskd"),
        Err(ureq::Error::Status(code, response)) => {
            let message = response
                .into_json::<Value>()
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            Err(anyhow!("kioskd returned {code}: {message}"))
        }
        Err(e) => Err(anyhow!("cannot reach kioskd: {e}")),
    }
}

fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli);

    match cli.command {
        Commands::Status => {
            let health = client.get("/api/health")?;
            let stats = client.get("/api/stats")?;
            println!("kioskd {} at {}", health["version"].as_str().unwrap_or("?"), client.base);
            println!("  employees:   {} ({} matchable)", health["employees"], health["signatures"]);
            println!(
                "  attendance:  {} today ({}%) on {}",
                stats["today_attendance"], stats["attendance_rate"], stats["date"].as_str().unwrap_or("")
            );
            println!(
                "  hours:       {} ({})",
                stats["operating_hours"].as_str().unwrap_or(""),
                if stats["within_hours"].as_bool().unwrap_or(false) { "open" } else { "closed" }
            );
        }
        Commands::Employees => {
            let body = client.get("/api/employees")?;
            let employees = body["employees"].as_array().cloned().unwrap_or_default();
            if employees.is_empty() {
                println!("No employees enrolled");
            }
            for e in &employees {
                println!(
                    "{:<12} {:<28} {:<16} {}",
                    e["Employee_ID"].as_str().unwrap_or(""),
                    e["Name"].as_str().unwrap_or(""),
                    e["Phone"].as_str().unwrap_or(""),
                    e["Registration_Date"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Enroll {
            id,
            name,
            image,
            phone,
            address,
        } => {
            let body = client.post(
                "/api/register",
                json!({
                    "emp_id": id,
                    "name": name,
                    "phone": phone,
                    "address": address,
                    "image": encode_image(&image)?,
                }),
            )?;
            println!("Enrolled {} ({})", body["name"].as_str().unwrap_or(""), body["emp_id"].as_str().unwrap_or(""));
        }
        Commands::Process { image } => {
            let body = client.post("/api/process-frame", json!({ "frame": encode_image(&image)? }))?;
            let faces = body["faces"].as_array().cloned().unwrap_or_default();
            if faces.is_empty() {
                println!("No faces detected");
            }
            for f in &faces {
                let outcome = if f["attended"].as_bool().unwrap_or(false) {
                    match f["mark"]["status"].as_str() {
                        Some(status) => format!("marked {status} ({} min late)", f["mark"]["minutes_late"]),
                        None => "marked (document write failed)".to_string(),
                    }
                } else if f["already_attended"].as_bool().unwrap_or(false) {
                    "already marked today".to_string()
                } else {
                    "not marked".to_string()
                };
                println!(
                    "{:<24} score {:.3}  box {}  {}",
                    f["name"].as_str().unwrap_or("Unknown"),
                    f["score"].as_f64().unwrap_or(0.0),
                    f["box"],
                    outcome
                );
            }
        }
        Commands::Cameras { action } => match action {
            CameraAction::List => {
                let body = client.get("/api/cctv-cameras")?;
                let cameras = body["cameras"].as_array().cloned().unwrap_or_default();
                if cameras.is_empty() {
                    println!("No cameras configured");
                }
                for c in &cameras {
                    println!(
                        "{:>3}  {:<20} {}",
                        c["id"],
                        c["name"].as_str().unwrap_or(""),
                        c["url"].as_str().unwrap_or("")
                    );
                }
            }
            CameraAction::Add { name, url } => {
                let body = client.post("/api/cctv-cameras", json!({ "name": name, "url": url }))?;
                println!("Camera added with ID {}", body["camera"]["id"]);
            }
            CameraAction::Remove { id } => {
                let body = client.delete(&format!("/api/cctv-cameras/{id}"))?;
                if body["removed"].as_bool().unwrap_or(false) {
                    println!("Camera {id} removed ({} open streams closed)", body["streams_closed"]);
                } else {
                    println!("No camera with ID {id}");
                }
            }
        },
        Commands::Report {
            granularity,
            date,
            output,
        } => {
            let body = client.post("/api/download-csv", json!({ "type": granularity, "date": date }))?;
            let Some(csv) = body["csv"].as_str() else {
                bail!("kioskd returned no CSV data");
            };
            let path = output.unwrap_or_else(|| {
                PathBuf::from(body["filename"].as_str().unwrap_or("attendance.csv"))
            });
            std::fs::write(&path, csv).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} records to {}", body["records"], path.display());
        }
    }

    Ok(())
}
