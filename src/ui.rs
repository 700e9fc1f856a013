/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Terminal output: levelled, wrapped messages on stderr, the digest
//! progress bar and the per-command summary table.

use crate::{APP_ABOUT, APP_AUTHOR, APP_NAME, APP_VERSION};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::{sync::Mutex, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Info,
    Detail,
    Success,
    Warn,
    Error,
}

impl Tone {
    fn paint_icon(self, icon: &str) -> ColoredString {
        match self {
            Tone::Info => icon.blue().bold(),
            Tone::Detail => icon.dimmed(),
            Tone::Success => icon.green().bold(),
            Tone::Warn => icon.yellow().bold(),
            Tone::Error => icon.red().bold(),
        }
    }

    fn paint_text(self, text: &str) -> ColoredString {
        match self {
            Tone::Detail => text.dimmed(),
            _ => text.normal(),
        }
    }
}

/// Output sink shared by the whole run. It is `Sync`, so rayon workers can
/// report progress through it.
pub struct Ui {
    pub verbose: bool,
    pub very_verbose: bool,
    pub debug: bool,
    silent: bool,
    colors: bool,
    progress_bar: Mutex<Option<ProgressBar>>,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(false, false, false, false, true)
    }
}

impl Ui {
    pub fn new(v: bool, vv: bool, d: bool, s: bool, c: bool) -> Self {
        Self {
            verbose: v,
            very_verbose: vv,
            debug: d,
            silent: s,
            colors: c,
            progress_bar: Mutex::new(None),
        }
    }

    pub fn from_verbosity_level(level: u8, s: bool, c: bool) -> Self {
        Self::new(level >= 1, level >= 2, level >= 3, s, c)
    }

    pub fn show_progress_bar(&self, len: u64, msg: &str) {
        if self.silent {
            return;
        }
        let tw = self.term_width();
        let label = Self::truncate_msg(msg, tw);
        let bar = if tw < 60 { "{bar:.green/red}" } else { "{wide_bar:.green/red}" };
        let eta = if tw < 60 { "" } else { " ({eta})" };
        let template = format!("{{spinner:.green}} {} {} {{pos}}/{{len}}{}", label, bar, eta);

        let style = ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["[|]", "[/]", "[-]", "[\\]"])
            .progress_chars("#>-");

        let pb = ProgressBar::new(len).with_style(style);
        pb.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut slot) = self.progress_bar.lock() {
            *slot = Some(pb);
        }
    }

    pub fn update_progress(&self, pos: u64) {
        if let Ok(slot) = self.progress_bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(pos);
            }
        }
    }

    pub fn finish_progress(&self) {
        if let Ok(mut slot) = self.progress_bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }

    pub fn has_progress_bar(&self) -> bool {
        self.progress_bar
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Shortens progress labels so the bar keeps a usable width.
    fn truncate_msg(msg: &str, tw: usize) -> String {
        let max_chars = match tw {
            0..=59 => 8,
            60..=79 => 15,
            _ => return msg.to_string(),
        };
        if msg.chars().count() > max_chars {
            format!("{}...", msg.chars().take(max_chars).collect::<String>())
        } else {
            msg.to_string()
        }
    }

    fn paint(&self, tone: Tone, icon: &str, msg: &str) {
        if self.silent && tone != Tone::Error {
            return;
        }
        let tw = self.term_width();
        let indent = if tw < 40 { 2 } else { icon.len() + 1 };
        let colored = self.supports_color();

        for (i, line) in self.wrap_msg(msg, indent).lines().enumerate() {
            let text = if colored {
                tone.paint_text(line).to_string()
            } else {
                line.to_string()
            };
            if i > 0 {
                eprintln!("{}{}", " ".repeat(indent), text);
            } else if colored {
                eprintln!("{} {}", tone.paint_icon(icon), text);
            } else {
                eprintln!("{} {}", icon, text);
            }
        }
    }

    pub fn print_banner(&self) {
        if !self.silent && self.verbose {
            self.print_rich_banner();
        }
    }

    fn print_rich_banner(&self) {
        let title = format!(" {} v{} ", APP_NAME, APP_VERSION);
        let colored = self.supports_color();
        if self.term_width() < title.len() + 4 {
            if colored {
                eprintln!("{}", title.cyan().bold());
            } else {
                eprintln!("{}", title);
            }
            return;
        }
        let rule = format!("+{}+", "-".repeat(title.len()));
        if colored {
            eprintln!("{}", rule.magenta().bold());
            eprintln!("|{}|", title.cyan().bold());
            eprintln!("{}", rule.magenta().bold());
        } else {
            eprintln!("{}\n|{}|\n{}", rule, title, rule);
        }
    }

    pub fn print_version_info(&self) {
        self.print_rich_banner();
        let rows = [
            ("Author:", APP_AUTHOR),
            ("Schemes:", "v1 (JAR), v2 (APK Signing Block)"),
            ("License:", "MIT"),
            ("Description:", APP_ABOUT),
        ];
        for (key, value) in rows {
            let key = format!("{:<13}", key);
            if self.supports_color() {
                println!("{}{}", key.yellow(), value.cyan());
            } else {
                println!("{}{}", key, value);
            }
        }
    }

    fn supports_color(&self) -> bool {
        self.colors && std::env::var_os("NO_COLOR").is_none()
    }

    pub fn enable_colors_if_supported(&mut self) {
        #[cfg(windows)]
        if self.supports_color() && !colored::control::SHOULD_COLORIZE.should_colorize() {
            colored::control::set_override(true);
        }
    }

    pub fn print_mode_header(&self, title: &str) {
        if self.silent || !self.verbose {
            return;
        }
        let header = if self.term_width() < title.len() + 6 {
            title.to_string()
        } else {
            format!("-- {} --", title)
        };
        eprintln!();
        if self.supports_color() {
            eprintln!("{}", header.yellow().bold());
        } else {
            eprintln!("{}", header);
        }
    }

    pub fn info(&self, msg: &str) {
        if self.verbose {
            self.paint(Tone::Info, "[i]", msg);
        }
    }
    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            self.paint(Tone::Detail, "[v]", msg);
        }
    }
    pub fn very_verbose(&self, msg: &str) {
        if self.very_verbose {
            self.paint(Tone::Detail, "[vv]", msg);
        }
    }
    pub fn debug(&self, msg: &str) {
        if self.debug {
            self.paint(Tone::Detail, "[dbg]", msg);
        }
    }
    pub fn success(&self, msg: &str) {
        self.paint(Tone::Success, "[+]", msg);
    }
    pub fn warn(&self, msg: &str) {
        self.paint(Tone::Warn, "[!]", msg);
    }
    pub fn error(&self, msg: &str) {
        self.paint(Tone::Error, "[x]", msg);
    }

    /// Key/value table; keys are padded to the longest one.
    pub fn print_summary(&self, title: &str, fields: &[(&str, String)]) {
        if self.silent || !self.verbose {
            return;
        }
        let colored = self.supports_color();
        eprintln!();
        if colored {
            eprintln!("{}", format!("{}:", title).green().bold());
        } else {
            eprintln!("{}:", title);
        }

        let key_width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let narrow = self.term_width() < 60;
        let indent = if narrow { 2 } else { key_width + 3 };

        for (key, value) in fields {
            let wrapped = self.wrap_msg(value, indent);
            let mut lines = wrapped.lines();
            let first = lines.next().unwrap_or("");
            let label = format!("{:<width$}", key, width = key_width);
            match (narrow, colored) {
                (true, true) => eprintln!("{}: {}", key.cyan().bold(), first.green()),
                (true, false) => eprintln!("{}: {}", key, first),
                (false, true) => eprintln!("  {} {}", label.cyan().bold(), first.green()),
                (false, false) => eprintln!("  {} {}", label, first),
            }
            for line in lines {
                if colored {
                    eprintln!("{}{}", " ".repeat(indent), line.green());
                } else {
                    eprintln!("{}{}", " ".repeat(indent), line);
                }
            }
        }
    }

    fn wrap_msg(&self, msg: &str, indent: usize) -> String {
        Self::wrap_to(msg, self.term_width(), indent)
    }

    /// Greedy word wrap to `term_width` minus `indent`. Words longer than a
    /// line (paths, fingerprints) are split.
    fn wrap_to(msg: &str, term_width: usize, indent: usize) -> String {
        let floor = if term_width > 20 { 20 } else { 10 };
        let width = term_width.saturating_sub(indent).max(floor);

        let mut lines: Vec<String> = Vec::new();
        let mut line = String::new();
        let mut line_len = 0;
        for word in msg.split_whitespace() {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(width) {
                let sep = usize::from(line_len > 0);
                if line_len + sep + piece.len() > width {
                    lines.push(std::mem::take(&mut line));
                    line_len = 0;
                } else if sep == 1 {
                    line.push(' ');
                    line_len += 1;
                }
                line.extend(piece);
                line_len += piece.len();
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
        lines.join("\n")
    }

    fn term_width(&self) -> usize {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| terminal_size::terminal_size().map(|(w, _)| w.0 as usize))
            .unwrap_or(80)
    }
}
