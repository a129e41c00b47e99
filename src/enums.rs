use std::fmt;

/// Anatomical direction that increasing index along one array axis moves
/// towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisDirection {
    Right,
    Left,
    Anterior,
    Posterior,
    Superior,
    Inferior,
}

impl AxisDirection {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'R' => Some(Self::Right),
            'L' => Some(Self::Left),
            'A' => Some(Self::Anterior),
            'P' => Some(Self::Posterior),
            'S' => Some(Self::Superior),
            'I' => Some(Self::Inferior),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Right => 'R',
            Self::Left => 'L',
            Self::Anterior => 'A',
            Self::Posterior => 'P',
            Self::Superior => 'S',
            Self::Inferior => 'I',
        }
    }

    /// Index of the RAS+ axis this direction lies on (0 = left/right,
    /// 1 = posterior/anterior, 2 = inferior/superior).
    pub fn anatomical_axis(self) -> usize {
        match self {
            Self::Right | Self::Left => 0,
            Self::Anterior | Self::Posterior => 1,
            Self::Superior | Self::Inferior => 2,
        }
    }

    /// Whether this direction agrees with the RAS+ convention.
    pub fn is_positive(self) -> bool {
        matches!(self, Self::Right | Self::Anterior | Self::Superior)
    }

    /// Direction for a world axis and the sign of the step along it.
    pub fn from_world_axis(axis: usize, positive: bool) -> Option<Self> {
        match (axis, positive) {
            (0, true) => Some(Self::Right),
            (0, false) => Some(Self::Left),
            (1, true) => Some(Self::Anterior),
            (1, false) => Some(Self::Posterior),
            (2, true) => Some(Self::Superior),
            (2, false) => Some(Self::Inferior),
            _ => None,
        }
    }
}

impl fmt::Display for AxisDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Coarse classification of request failures, used to pick the client
/// facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Decode,
    Pipeline,
    Engine,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::Decode => 400,
            Self::Pipeline | Self::Engine => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Decode => "decode",
            Self::Pipeline => "pipeline",
            Self::Engine => "engine",
        }
    }
}
