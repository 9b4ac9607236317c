use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category10, the default line palette.
pub const CATEGORY10: [&str; 10] = [
    "#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD", "#8C564B", "#E377C2", "#7F7F7F", "#BCBD22", "#17BECF",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl FromStr for Color {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Validation(format!("'{}' is not a #RRGGBB color", value)));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|error| AppError::Validation(error.to_string()))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl TryFrom<String> for Color {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.hex()
    }
}

pub fn default_palette() -> Vec<Color> {
    CATEGORY10
        .iter()
        .filter_map(|hex| hex.parse().ok())
        .collect()
}

/// Parses and de-duplicates a configured palette.
pub fn parse_palette(entries: &[String]) -> AppResult<Vec<Color>> {
    let mut palette: Vec<Color> = Vec::with_capacity(entries.len());
    for entry in entries {
        let color: Color = entry.parse()?;
        if !palette.contains(&color) {
            palette.push(color);
        }
    }
    if palette.is_empty() {
        return Err(AppError::Validation("palette must contain at least one color".to_string()));
    }
    Ok(palette)
}

/// Finite set of line colors. A color is handed out at most once until it is
/// released; the cursor keeps recently released colors at the back of the
/// queue so they come around again only after the rest of the palette.
#[derive(Debug, Clone)]
pub struct ColorPool {
    palette: Vec<Color>,
    in_use: Vec<Color>,
    cursor: usize,
}

impl Default for ColorPool {
    fn default() -> Self {
        Self::new(default_palette())
    }
}

impl ColorPool {
    pub fn new(palette: Vec<Color>) -> Self {
        Self {
            palette,
            in_use: Vec::new(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.palette.len()
    }

    pub fn in_use(&self) -> &[Color] {
        &self.in_use
    }

    pub fn has_free(&self) -> bool {
        self.palette.iter().any(|color| !self.in_use.contains(color))
    }

    pub fn acquire(&mut self) -> Option<Color> {
        let len = self.palette.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let color = self.palette[index];
            if !self.in_use.contains(&color) {
                self.in_use.push(color);
                self.cursor = (index + 1) % len;
                return Some(color);
            }
        }
        None
    }

    pub fn release(&mut self, color: Color) -> bool {
        let before = self.in_use.len();
        self.in_use.retain(|current| *current != color);
        self.in_use.len() != before
    }

    pub fn release_all(&mut self) {
        self.in_use.clear();
        self.cursor = 0;
    }

    /// Swaps the palette. Only allowed while no color is handed out.
    pub fn replace_palette(&mut self, palette: Vec<Color>) -> bool {
        if !self.in_use.is_empty() || palette.is_empty() {
            return false;
        }
        self.palette = palette;
        self.cursor = 0;
        true
    }
}
