use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use color_eyre::eyre::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;

use riko_core::{Envelope, command, notify};
use riko_db::Db;
use riko_ipc::WorkerClient;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .from_env_lossy()
                .add_directive("riko_cli=info".parse().unwrap())
                .add_directive("riko_ipc=info".parse().unwrap())
                .add_directive("riko_db=info".parse().unwrap()),
        )
        .init();

    let db = Arc::new(Db::new().await.wrap_err("failed to open the database")?);
    let mut cli = Cli { db, workers: HashMap::new() };

    loop {
        print_menu();
        let choice = read_line("Choice: ")?;

        let result = match choice.as_str() {
            "1" => cli.register_device().await,
            "2" => cli.list_devices().await,
            "3" => cli.start_session().await,
            "4" => cli.stop_session().await,
            "5" => cli.restart_session().await,
            "6" => cli.logout().await,
            "7" => cli.send_message().await,
            "8" => cli.list_contacts().await,
            "9" => cli.list_chats().await,
            "10" => cli.list_messages().await,
            "11" => cli.worker_stats().await,
            "0" => {
                println!("👋 Shutting down...");
                cli.shutdown().await;
                break;
            }
            _ => {
                println!("❌ Invalid choice");
                Ok(())
            }
        };

        if let Err(error) = result {
            println!("❌ {error}");
        }
    }

    Ok(())
}

fn print_menu() {
    println!();
    println!("╔════════════════════════════════════╗");
    println!("║         RIKO CLI - WhatsApp        ║");
    println!("╠════════════════════════════════════╣");
    println!("║  1. Register Device                ║");
    println!("║  2. List Devices                   ║");
    println!("║  3. Start Session                  ║");
    println!("║  4. Stop Session                   ║");
    println!("║  5. Restart Session                ║");
    println!("║  6. Logout                         ║");
    println!("║  7. Send Message                   ║");
    println!("║  8. List Contacts                  ║");
    println!("║  9. List Chats                     ║");
    println!("║  10. List Messages                 ║");
    println!("║  11. Worker Stats                  ║");
    println!("║  0. Exit                           ║");
    println!("╚════════════════════════════════════╝");
}

struct Cli {
    db: Arc<Db>,
    workers: HashMap<String, WorkerClient>,
}

impl Cli {
    async fn register_device(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let device = self.db.create_device(&id).await?;
        println!("✅ Registered device: {} ({})", device.id, device.status);
        Ok(())
    }

    async fn list_devices(&mut self) -> Result<()> {
        let devices = self.db.list_devices().await?;

        if devices.is_empty() {
            println!("📭 No devices registered");
            return Ok(());
        }

        println!("\n📋 Devices:");
        for device in devices {
            let light = match device.status.as_str() {
                "open" => "🟢",
                "connecting" | "receiving_qr" => "🟡",
                _ => "🔴",
            };
            println!(
                "  {} {} - {} {}",
                light,
                device.id,
                device.status,
                device.owner_jid.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn start_session(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let reply = self.worker(&id).await?.request(Envelope::request(command::START)).await?;
        report(&reply);
        if reply.status == Some(true) {
            println!("🔄 Starting {id}... watch for the QR code if unpaired");
        }
        Ok(())
    }

    async fn stop_session(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let reply = self.worker(&id).await?.request(Envelope::request(command::STOP)).await?;
        report(&reply);
        if reply.status == Some(true) {
            // The worker process exits after a successful stop.
            self.workers.remove(&id);
        }
        Ok(())
    }

    async fn restart_session(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let reply = self.worker(&id).await?.request(Envelope::request(command::RESTART)).await?;
        report(&reply);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let reply = self.worker(&id).await?.request(Envelope::request(command::LOGOUT)).await?;
        report(&reply);
        Ok(())
    }

    async fn send_message(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let to = read_line("To (JID or phone): ")?;
        let text = read_line("Message: ")?;

        let request = Envelope::request(command::SEND_MESSAGE)
            .with_data(json!({ "to": to, "text": text }));
        let reply = self.worker(&id).await?.request(request).await?;

        match reply.status {
            Some(true) => {
                let key_id = reply
                    .data
                    .as_ref()
                    .and_then(|d| d.get("keyId"))
                    .and_then(|k| k.as_str())
                    .unwrap_or("?");
                println!("📤 Message sent (key: {key_id})");
            }
            _ => report(&reply),
        }
        Ok(())
    }

    async fn list_contacts(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let contacts = self.db.get_device_contacts(&id).await?;

        if contacts.is_empty() {
            println!("📭 No contacts found");
            return Ok(());
        }

        println!("\n📇 Contacts ({}):", contacts.len());
        for contact in contacts.iter().take(20) {
            println!(
                "  📱 {} - {}",
                contact.jid,
                contact
                    .name
                    .as_deref()
                    .or(contact.notify_name.as_deref())
                    .unwrap_or("?")
            );
        }
        if contacts.len() > 20 {
            println!("  ... and {} more", contacts.len() - 20);
        }
        Ok(())
    }

    async fn list_chats(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let chats = self.db.list_chats(&id).await?;

        if chats.is_empty() {
            println!("📭 No chats found");
            return Ok(());
        }

        println!("\n💬 Chats ({}):", chats.len());
        for (i, chat) in chats.iter().enumerate().take(20) {
            let unread = if chat.unread_count > 0 {
                format!(" ({} unread)", chat.unread_count)
            } else {
                String::new()
            };
            println!(
                "  {}. {}{}",
                i + 1,
                chat.display_name.as_deref().unwrap_or(&chat.jid),
                unread
            );
        }
        if chats.len() > 20 {
            println!("  ... and {} more", chats.len() - 20);
        }
        Ok(())
    }

    async fn list_messages(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let jid = read_line("Chat JID: ")?;
        let messages = self.db.list_messages(&id, &jid, 20).await?;

        if messages.is_empty() {
            println!("📭 No messages found");
            return Ok(());
        }

        println!("\n💬 Messages ({}):", messages.len());
        for msg in messages.iter().rev() {
            let direction = if msg.from_me { "→" } else { "←" };
            let sender = msg
                .participant
                .as_deref()
                .or(msg.push_name.as_deref())
                .unwrap_or(&msg.remote_jid);
            println!(
                "  {} [{}] {}: {}",
                direction,
                msg.content_type,
                sender,
                msg.text.as_deref().unwrap_or("[media]")
            );
        }
        Ok(())
    }

    async fn worker_stats(&mut self) -> Result<()> {
        let id = read_line("Device ID: ")?;
        let Some(client) = self.workers.get(&id) else {
            println!("📭 No worker running for {id}");
            return Ok(());
        };

        let memory = client.request(Envelope::request(command::GET_MEMORY_USAGE)).await?;
        let cpu = client.request(Envelope::request(command::GET_CPU_USAGE)).await?;
        let uptime = client.request(Envelope::request(command::GET_UPTIME)).await?;

        let bytes = data_u64(&memory, "bytes");
        println!("\n📊 Worker {id}:");
        println!("  Memory: {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
        println!("  CPU time: {}s", data_u64(&cpu, "cpuSeconds"));
        println!("  Uptime: {}s", data_u64(&uptime, "seconds"));
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (device_id, client) in &self.workers {
            if let Err(error) = client.request(Envelope::request(command::STOP)).await {
                println!("⚠️  Could not stop worker {device_id}: {error}");
            }
        }
        for (_, mut client) in self.workers.drain() {
            client.kill().await.ok();
        }
    }

    /// Reuse the live worker for this device, or spawn one.
    async fn worker(&mut self, device_id: &str) -> Result<&WorkerClient> {
        if let Some(client) = self.workers.get_mut(device_id) {
            if !client.is_running() {
                println!("⚠️  Worker for {device_id} exited, respawning");
                self.workers.remove(device_id);
            }
        }

        if !self.workers.contains_key(device_id) {
            let cwd = std::env::current_dir()?;
            let mut client = WorkerClient::spawn(&cwd, &worker_program(), device_id)
                .await
                .wrap_err("failed to spawn the worker process")?;
            if let Some(rx) = client.take_notification_receiver() {
                spawn_notification_printer(device_id.to_owned(), rx);
            }
            self.workers.insert(device_id.to_owned(), client);
        }

        Ok(&self.workers[device_id])
    }
}

fn report(reply: &Envelope) {
    match reply.status {
        Some(true) => println!("✅ {}", reply.message.as_deref().unwrap_or("ok")),
        _ => println!("❌ {}", reply.message.as_deref().unwrap_or("failed")),
    }
}

fn data_u64(envelope: &Envelope, key: &str) -> u64 {
    envelope
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

fn spawn_notification_printer(device_id: String, mut rx: mpsc::Receiver<Envelope>) {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            print_notification(&device_id, &envelope);
        }
    });
}

fn print_notification(device_id: &str, envelope: &Envelope) {
    match envelope.command.as_str() {
        notify::CONNECTION_UPDATE => {
            let status = envelope
                .data
                .as_ref()
                .and_then(|d| d.get("status"))
                .and_then(|s| s.as_str())
                .unwrap_or("?");
            println!("\n🔄 [{device_id}] status: {status}");
        }
        notify::QR_UPDATED => {
            let qr = envelope
                .data
                .as_ref()
                .and_then(|d| d.get("qr"))
                .and_then(|q| q.as_str());
            if let Some(qr) = qr {
                println!("\n📱 [{device_id}] scan to pair:");
                print_qr(qr);
            }
        }
        notify::STOPPED => println!("\n🛑 [{device_id}] session stopped"),
        notify::DEVICE_NOT_FOUND => {
            println!("\n❌ [{device_id}] device is not registered (use option 1 first)");
        }
        notify::DEVICE_ALREADY_STARTED => {
            println!("\n⚠️  [{device_id}] session already running");
        }
        notify::DB_CONNECTION_ERROR => {
            println!(
                "\n❌ [{device_id}] worker could not reach the database: {}",
                envelope.message.as_deref().unwrap_or("unknown error")
            );
        }
        other => println!("\nℹ️  [{device_id}] {other}"),
    }
}

fn print_qr(qr: &str) {
    if let Err(error) = qr2term::print_qr(qr) {
        eprintln!("Failed to render QR code: {error}");
        println!("Raw QR data: {qr}");
    }
}

/// The worker binary normally sits next to this one in the target
/// directory; `RIKO_WORKER_BIN` overrides for packaged installs.
fn worker_program() -> String {
    if let Ok(program) = std::env::var("RIKO_WORKER_BIN") {
        return program;
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("riko-workerd")))
        .filter(|path| path.exists())
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "riko-workerd".to_owned())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
