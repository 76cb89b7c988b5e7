/// Release channel of an uploaded file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseType {
    Release,
    Beta,
    Alpha,
    Unknown,
}

impl ReleaseType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ReleaseType::Release,
            2 => ReleaseType::Beta,
            3 => ReleaseType::Alpha,
            _ => ReleaseType::Unknown,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Release => "release",
            ReleaseType::Beta => "beta",
            ReleaseType::Alpha => "alpha",
            ReleaseType::Unknown => "unknown",
        }
    }
}

// Approved and released. Files in any other moderation state are not public.
const PUBLISHABLE_FILE_STATUSES: &[i32] = &[4, 10];

pub fn is_publishable(file_status: i32) -> bool {
    PUBLISHABLE_FILE_STATUSES.contains(&file_status)
}
