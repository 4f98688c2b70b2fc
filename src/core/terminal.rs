use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static BOOK: Emoji<'_, '_> = Emoji("📖 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_schedule(tenant: &str, cron: &str, next: &str) {
    println!(
        "  {} {} {} (next: {})",
        CLOCK,
        style(tenant).bold(),
        style(cron).cyan(),
        next
    );
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        BOOK,
        style("wxread").bold().cyan()
    );
    println!("{}\n", style("Scheduled reading sessions, signed and paced.").dim());
}

/// A titled block of help lines, as printed by `wxread help`.
pub struct GuideSection {
    title: String,
    lines: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn entry(mut self, usage: &str, description: &str) -> Self {
        self.lines.push((usage.to_string(), description.to_string()));
        self
    }

    pub fn print(&self) {
        println!("{}", style(&self.title).bold().underlined());
        let width = self.lines.iter().map(|(u, _)| u.len()).max().unwrap_or(0);
        for (usage, description) in &self.lines {
            println!(
                "  {:<width$}  {}",
                style(usage).cyan(),
                description,
                width = width
            );
        }
        println!();
    }
}

pub fn print_goodbye() {
    println!("\n{} {}", BOOK, style("wxread stopped. Happy reading!").bold().cyan());
}
