#![allow(dead_code)]

use mbox_index::config::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Scratch workspace with an archive and output locations
pub struct TestEnv {
    pub dir: TempDir,
    pub archive: PathBuf,
}

impl TestEnv {
    /// Create a workspace holding `archive` as `all.mbox`
    pub fn with_archive(archive: &[u8]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("all.mbox");
        std::fs::write(&path, archive).expect("write archive");
        Self { dir, archive: path }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path("out")
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.path("results.db").display())
    }

    /// Config writing into this workspace
    pub fn config(&self, workers: usize) -> Config {
        let mut config = Config::default();
        config.workers.count = workers;
        config.workers.chunk_size = 16;
        config.writer.max_items = 25;
        config.output.dir = self.output_dir().display().to_string();
        config.output.database_url = self.database_url();
        config
    }

    pub fn append(&self, data: &[u8]) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.archive)
            .expect("open archive");
        file.write_all(data).expect("append archive");
    }

    /// Every file under the output directory, relative to it
    pub fn output_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.output_dir(), &self.output_dir(), &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.display().to_string());
        }
    }
}

/// A synthetic mailbox message
pub struct MailSpec<'a> {
    pub from: &'a str,
    pub subject: &'a str,
    pub thread: Option<&'a str>,
    pub in_reply_to: Option<&'a str>,
    pub date: &'a str,
    pub body: &'a str,
    pub attachment: bool,
}

impl Default for MailSpec<'_> {
    fn default() -> Self {
        Self {
            from: "alice@example.com",
            subject: "Hello",
            thread: None,
            in_reply_to: None,
            date: "Mon, 1 Jan 2024 10:00:00 +0000",
            body: "Hi there.",
            attachment: false,
        }
    }
}

impl MailSpec<'_> {
    /// Render as an mbox record, envelope included
    pub fn render(&self) -> Vec<u8> {
        let mut out = format!("From {} Mon Jan  1 10:00:00 2024\n", self.from);
        out.push_str(&format!("From: {}\n", self.from));
        out.push_str("To: archive@example.net\n");
        out.push_str(&format!("Subject: {}\n", self.subject));
        out.push_str(&format!("Date: {}\n", self.date));
        if let Some(thread) = self.thread {
            out.push_str(&format!("X-GM-THRID: {}\n", thread));
        }
        if let Some(parent) = self.in_reply_to {
            out.push_str(&format!("In-Reply-To: <{}>\n", parent));
        }

        if self.attachment {
            out.push_str("MIME-Version: 1.0\n");
            out.push_str("Content-Type: multipart/mixed; boundary=\"XYZ\"\n\n");
            out.push_str("--XYZ\nContent-Type: text/plain\n\n");
            out.push_str(self.body);
            out.push_str("\n--XYZ\nContent-Type: application/octet-stream\n");
            out.push_str("Content-Disposition: attachment; filename=\"data.bin\"\n");
            out.push_str("Content-Transfer-Encoding: base64\n\nAAECAwQFBgc=\n--XYZ--\n");
        } else {
            out.push('\n');
            out.push_str(self.body);
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// Concatenate rendered messages
pub fn mbox(messages: &[MailSpec<'_>]) -> Vec<u8> {
    messages.iter().flat_map(MailSpec::render).collect()
}

pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}
