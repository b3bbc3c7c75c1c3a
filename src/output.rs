use std::cell::Cell;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use log::{info, warn};

use crate::core::RegisterStore;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

/// A single digital output.
pub trait OutputPin {
    fn set_level(&mut self, level: Level);
}

/// Pin that only reports level changes in the log.
#[derive(Debug, Default)]
pub struct LogPin {
    level: Option<Level>,
}

impl OutputPin for LogPin {
    fn set_level(&mut self, level: Level) {
        if self.level != Some(level) {
            info!("Output {:?}", level);
            self.level = Some(level);
        }
    }
}

/// Pin backed by a GPIO value file such as `/sys/class/gpio/gpio2/value`.
#[derive(Debug)]
pub struct FilePin {
    path: PathBuf,
}

impl FilePin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePin { path: path.into() }
    }

    pub fn write(&self, level: Level) -> io::Result<()> {
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        fs::write(&self.path, value)
    }
}

impl OutputPin for FilePin {
    fn set_level(&mut self, level: Level) {
        if let Err(e) = self.write(level) {
            warn!("Failed to drive {}: {}", self.path.display(), e);
        }
    }
}

/// Pin whose level lives in a shared cell, readable through any clone.
#[derive(Debug, Clone)]
pub struct MemoryPin {
    level: Rc<Cell<Level>>,
}

impl MemoryPin {
    pub fn new() -> Self {
        MemoryPin { level: Rc::new(Cell::new(Level::Low)) }
    }

    pub fn level(&self) -> Level {
        self.level.get()
    }
}

impl Default for MemoryPin {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPin for MemoryPin {
    fn set_level(&mut self, level: Level) {
        self.level.set(level);
    }
}

/// Drives a pin from coil 0.
pub struct OutputMirror<P> {
    pin: P,
}

impl<P: OutputPin> OutputMirror<P> {
    /// Takes the pin and drives it low.
    pub fn new(mut pin: P) -> Self {
        pin.set_level(Level::Low);
        OutputMirror { pin }
    }

    pub fn update(&mut self, store: &RegisterStore) {
        // a store without coils keeps the output low
        let coil = store.coil(0).unwrap_or(false);
        self.pin.set_level(Level::from(coil));
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}
