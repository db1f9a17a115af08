//! Shared archive builders for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One synthetic message, envelope line included
pub fn message(id: usize, thread: Option<&str>, domain: &str, body_lines: usize) -> Vec<u8> {
    let mut out = format!(
        "From sender{id}@{domain} Mon Jan  1 00:00:{:02} 2024\n\
From: Sender {id} <sender{id}@{domain}>\n\
To: archive@example.net\n\
Subject: Message {id}\n\
Date: Mon, 1 Jan 2024 00:{:02}:00 +0000\n\
Message-ID: <msg-{id}@{domain}>\n",
        id % 60,
        id % 60,
    );
    if let Some(thread) = thread {
        out.push_str(&format!("X-GM-THRID: {}\n", thread));
    }
    out.push('\n');
    for line in 0..body_lines {
        out.push_str(&format!("Body line {} of message {}\n", line, id));
    }
    // Escaped envelope inside a body is not a boundary
    out.push_str(">From the archives\n");
    out.into_bytes()
}

/// Archive of `count` messages, threads of three, two sender domains
pub fn archive_bytes(count: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..count {
        let thread = format!("thread-{}", i / 3);
        let domain = if i % 2 == 0 { "example.com" } else { "example.org" };
        data.extend_from_slice(&message(i, Some(&thread), domain, i % 5));
    }
    data
}

pub fn write_archive(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Line-by-line count of envelope lines
pub fn brute_force_count(data: &[u8]) -> usize {
    data.split(|&b| b == b'\n')
        .filter(|line| line.starts_with(b"From "))
        .count()
}

pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}
