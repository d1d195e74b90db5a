//! Log output and a status line on stderr.
//!
//! Stdout is reserved for the download link so that it can be piped.

use {
    byte_unit::{Byte, UnitType},
    crossterm::{
        QueueableCommand, cursor,
        style::{Color, ResetColor, SetForegroundColor},
        terminal,
    },
    parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard},
    std::{
        fmt::{self, Display, Write as _},
        io::{self, Stderr, Write},
        process,
        sync::{Arc, LazyLock},
    },
    tokio::{runtime::Handle, signal::ctrl_c},
    tracing::{Event, Level, Metadata, Subscriber, field::Visit, warn},
    tracing_subscriber::{Layer, layer::Context},
};

struct Term {
    stderr: Stderr,
    current_status: Option<String>,
}

fn term() -> ArcMutexGuard<RawMutex, Term> {
    static TERM: LazyLock<Arc<Mutex<Term>>> =
        LazyLock::new(|| Arc::new(Mutex::new(Term::new())));
    Mutex::lock_arc(&TERM)
}

fn clear_status() {
    let _ = term().clear_status();
}

impl Term {
    fn new() -> Self {
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async {
                match ctrl_c().await {
                    Ok(()) => {
                        clear_status();
                        let _ = writeln!(io::stderr(), "Interrupted.");
                        process::exit(1);
                    }
                    Err(err) => {
                        warn!(?err, "failed to listen to interrupt signal");
                    }
                }
            });
        }
        Self {
            stderr: io::stderr(),
            current_status: None,
        }
    }

    fn set_status(&mut self, status: String) -> io::Result<()> {
        if self.current_status.is_none() {
            self.stderr.queue(cursor::Hide)?;
            self.stderr.queue(terminal::DisableLineWrap)?;
        } else {
            self.stderr.queue(cursor::RestorePosition)?;
            self.stderr
                .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
        }
        self.stderr.queue(cursor::SavePosition)?;
        self.stderr.queue(SetForegroundColor(Color::DarkGreen))?;
        self.stderr.write_all(status.as_bytes())?;
        self.stderr.queue(ResetColor)?;
        self.stderr.queue(cursor::RestorePosition)?;
        self.stderr.flush()?;
        self.current_status = Some(status);
        Ok(())
    }

    fn clear_status(&mut self) -> io::Result<()> {
        if self.current_status.is_none() {
            return Ok(());
        }
        self.current_status = None;
        self.stderr.queue(cursor::RestorePosition)?;
        self.stderr
            .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
        self.stderr.queue(terminal::EnableLineWrap)?;
        self.stderr.queue(cursor::Show)?;
        self.stderr.flush()
    }

    fn write(&mut self, color: Option<Color>, mut text: String) -> io::Result<()> {
        let old_status = self.current_status.clone();
        self.clear_status()?;
        if let Some(color) = color {
            self.stderr.queue(SetForegroundColor(color))?;
        }
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.stderr.write_all(text.as_bytes())?;
        if color.is_some() {
            self.stderr.queue(ResetColor)?;
        }
        if let Some(old_status) = old_status {
            self.set_status(old_status)?;
        }
        self.stderr.flush()
    }
}

#[must_use]
pub fn pretty_size(size: u64) -> impl Display {
    let adjusted = Byte::from_u64(size).get_appropriate_unit(UnitType::Decimal);
    format!("{adjusted:.1}")
}

/// Status line tracking bytes processed out of a known total.
///
/// Does nothing when disabled. The line is removed on drop.
pub struct Progress {
    label: &'static str,
    total: u64,
    done: u64,
    enabled: bool,
}

impl Progress {
    #[must_use]
    pub fn new(label: &'static str, total: u64, enabled: bool) -> Self {
        let progress = Self {
            label,
            total,
            done: 0,
            enabled,
        };
        progress.draw();
        progress
    }

    pub fn advance(&mut self, bytes: u64) {
        self.done = self.done.saturating_add(bytes);
        self.draw();
    }

    fn draw(&self) {
        if self.enabled {
            let _ = term().set_status(self.to_string());
        }
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = self
            .done
            .saturating_mul(100)
            .checked_div(self.total)
            .unwrap_or(100);
        write!(
            f,
            "{}: {} / {} ({percent}%)",
            self.label,
            pretty_size(self.done),
            pretty_size(self.total),
        )
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if self.enabled {
            clear_status();
        }
    }
}

/// Writes log events of this tool above the status line.
pub struct TermLayer;

impl<S: Subscriber> Layer<S> for TermLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        let mut fields = Vec::new();
        event.record(&mut DebugVisitor(&mut message, &mut fields));
        if !fields.is_empty() {
            let _ = write!(message, " ({})", fields.join(", "));
        }
        let level = *event.metadata().level();
        let color = if level == Level::ERROR || level == Level::WARN {
            Some(Color::Red)
        } else if level == Level::INFO {
            None
        } else {
            Some(Color::Grey)
        };
        let _ = term().write(color, message);
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        metadata
            .module_path()
            .is_some_and(|path| path.starts_with("filecrypt"))
    }
}

struct DebugVisitor<'a>(&'a mut String, &'a mut Vec<String>);

impl Visit for DebugVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            self.1.push(format!("{} = {:?}", field.name(), value));
        }
    }
}
