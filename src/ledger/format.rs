//! Serial formatter
//!
//! Pure rendering of serial ranges into the identifiers printed on holdings
//! and retirement certificates. Nothing here has authority over the ledger.

use serde::{Deserialize, Serialize};

use super::ids::BatchId;
use super::interval::{Serial, Subrange};
use crate::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "SIM-REG";
pub const DEFAULT_WIDTH: usize = 8;

/// Renders serials with a registry prefix and zero-padding width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialFormatter {
    pub prefix: String,
    pub width: usize,
}

impl Default for SerialFormatter {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            width: DEFAULT_WIDTH,
        }
    }
}

impl SerialFormatter {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    pub fn serial(&self, serial: Serial) -> String {
        format!("{:0width$}", serial, width = self.width)
    }

    /// `00000001` for a single serial, `00000001-00050000` otherwise.
    pub fn range(&self, start: Serial, end: Serial) -> Result<String> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        if start == end {
            Ok(self.serial(start))
        } else {
            Ok(format!("{}-{}", self.serial(start), self.serial(end)))
        }
    }

    /// `PREFIX-{project}-{vintage_start}-{vintage_end}-{batch suffix}-{start}-{end}`
    pub fn human_readable_id(
        &self,
        project_code: &str,
        vintage_start: i32,
        vintage_end: i32,
        batch_id: &BatchId,
        start: Serial,
        end: Serial,
    ) -> Result<String> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(format!(
            "{}-{}-{}-{}-{}-{}-{}",
            self.prefix,
            project_code,
            vintage_start,
            vintage_end,
            batch_id.suffix(),
            self.serial(start),
            self.serial(end)
        ))
    }
}

/// [`SerialFormatter::range`] with the default width.
pub fn format_range(start: Serial, end: Serial) -> Result<String> {
    SerialFormatter::default().range(start, end)
}

/// [`SerialFormatter::human_readable_id`] with the default prefix and width.
pub fn human_readable_id(
    project_code: &str,
    vintage_start: i32,
    vintage_end: i32,
    batch_id: &BatchId,
    start: Serial,
    end: Serial,
) -> Result<String> {
    SerialFormatter::default().human_readable_id(
        project_code,
        vintage_start,
        vintage_end,
        batch_id,
        start,
        end,
    )
}

/// Parses `N` or `N-M` (padding optional) back into a subrange.
pub fn parse_range(input: &str) -> Result<Subrange> {
    let invalid = || Error::InvalidArgument(format!("invalid serial range '{}'", input));
    let parse = |s: &str| s.trim().parse::<Serial>().map_err(|_| invalid());

    match input.trim().split_once('-') {
        Some((start, end)) => Subrange::new(parse(start)?, parse(end)?),
        None => {
            let serial = parse(input)?;
            Ok(Subrange {
                start: serial,
                end: serial,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_format_range() -> Result<()> {
        assert_eq!(format_range(1, 1)?, "00000001");
        assert_eq!(format_range(1, 50000)?, "00000001-00050000");
        assert_eq!(format_range(45001, 50000)?, "00045001-00050000");
        Ok(())
    }

    #[test]
    fn test_format_range_rejects_inverted() {
        assert_eq!(
            format_range(10, 9),
            Err(Error::InvalidRange { start: 10, end: 9 })
        );
    }

    #[test]
    fn test_wide_serials_are_not_truncated() -> Result<()> {
        assert_eq!(format_range(123_456_789, 123_456_790)?, "123456789-123456790");
        Ok(())
    }

    #[test]
    fn test_human_readable_id() -> Result<()> {
        let batch_id = BatchId::from_uuid(Uuid::parse_str("6f1c2e7a-0000-4000-8000-00000000ba01").unwrap());
        let id = human_readable_id("PRJ001", 2021, 2022, &batch_id, 1, 2000)?;
        assert_eq!(id, "SIM-REG-PRJ001-2021-2022-BA01-00000001-00002000");

        let custom = SerialFormatter::new("TEST", 4);
        assert_eq!(
            custom.human_readable_id("X", 2020, 2020, &batch_id, 7, 7)?,
            "TEST-X-2020-2020-BA01-0007-0007"
        );
        Ok(())
    }

    #[test]
    fn test_human_readable_id_keeps_project_code_verbatim() -> Result<()> {
        let batch_id = BatchId::from_uuid(Uuid::parse_str("6f1c2e7a-0000-4000-8000-00000000ba01").unwrap());
        let id = human_readable_id("Mangrove1", 2019, 2020, &batch_id, 5, 9)?;
        assert_eq!(id, "SIM-REG-Mangrove1-2019-2020-BA01-00000005-00000009");
        Ok(())
    }

    #[test]
    fn test_parse_range() -> Result<()> {
        assert_eq!(parse_range("00000001-00050000")?, Subrange { start: 1, end: 50000 });
        assert_eq!(parse_range("42")?, Subrange { start: 42, end: 42 });
        assert_eq!(parse_range(&format_range(20, 25)?)?, Subrange { start: 20, end: 25 });
        assert!(parse_range("abc").is_err());
        assert!(parse_range("9-3").is_err());
        Ok(())
    }
}
