use serde::{Deserialize, Serialize};

pub const PANEL_WINDOW_LEN: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Wave {
    pub year: u16,
    pub quarter: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveError {
    InvalidQuarter(u8),
    InvalidLabel(String),
}

impl std::fmt::Display for WaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuarter(quarter) => write!(f, "quarter `{quarter}` is not in 1..=4"),
            Self::InvalidLabel(label) => {
                write!(f, "expected a period label like `2023T1`, got `{label}`")
            }
        }
    }
}

impl std::error::Error for WaveError {}

impl Wave {
    pub fn new(year: u16, quarter: u8) -> Result<Self, WaveError> {
        if !(1..=4).contains(&quarter) {
            return Err(WaveError::InvalidQuarter(quarter));
        }
        Ok(Self { year, quarter })
    }

    pub fn label(self) -> String {
        format!("{}T{}", self.year, self.quarter)
    }

    pub fn parse_label(label: &str) -> Result<Self, WaveError> {
        let Some((year_raw, quarter_raw)) = label.split_once('T') else {
            return Err(WaveError::InvalidLabel(label.to_string()));
        };
        let year = year_raw
            .parse::<u16>()
            .map_err(|_| WaveError::InvalidLabel(label.to_string()))?;
        let quarter = quarter_raw
            .parse::<u8>()
            .map_err(|_| WaveError::InvalidLabel(label.to_string()))?;
        Self::new(year, quarter).map_err(|_| WaveError::InvalidLabel(label.to_string()))
    }

    pub fn next(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    pub fn plus_quarters(self, count: u8) -> Self {
        let mut wave = self;
        for _ in 0..count {
            wave = wave.next();
        }
        wave
    }

    pub fn range(from: Self, to: Self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = from;
        while current <= to {
            out.push(current);
            current = current.next();
        }
        out
    }

    pub fn window(start: Self) -> Vec<Self> {
        let mut out = Vec::with_capacity(PANEL_WINDOW_LEN as usize);
        let mut current = start;
        for _ in 0..PANEL_WINDOW_LEN {
            out.push(current);
            current = current.next();
        }
        out
    }
}
