use std::{fs, path::Path};

use serde::Serialize;

use crate::detector::DetectorError;

/// Name reported for class ids outside the class table.
pub const UNKNOWN_CLASS: &str = "unknown";

const FALLBACK_CLASSES: [&str; 8] = [
    "person", "bottle", "fan", "pencil", "book", "laptop", "mouse", "keyboard",
];

/// Corner box `(x0, y0)`–`(x1, y1)` in the pixel space of the frame that
/// produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BoundingBox {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Single detection returned by a detector. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox, classes: &ClassTable) -> Self {
        Self {
            class_id,
            class_name: classes.name(class_id).to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    /// Confidence as a whole percentage, truncated.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0) as u32
    }
}

/// Lookup table from class id to display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new(FALLBACK_CLASSES.iter().map(|name| name.to_string()))
    }
}

impl ClassTable {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Load one class name per line, skipping blank lines.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| DetectorError::Labels {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        ))
    }

    pub fn name(&self, class_id: usize) -> &str {
        self.names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CLASS)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn out_of_range_class_is_unknown() {
        let table = ClassTable::default();
        assert_eq!(table.name(0), "person");
        assert_eq!(table.name(7), "keyboard");
        assert_eq!(table.name(8), UNKNOWN_CLASS);
    }

    #[test]
    fn detection_takes_name_from_table() {
        let table = ClassTable::new(["cat".to_string(), "dog".to_string()]);
        let det = Detection::new(1, 0.874, BoundingBox::new(1, 2, 3, 4), &table);
        assert_eq!(det.class_name, "dog");
        assert_eq!(det.confidence_percent(), 87);

        let stray = Detection::new(5, 1.7, BoundingBox::default(), &table);
        assert_eq!(stray.class_name, UNKNOWN_CLASS);
        assert_eq!(stray.confidence, 1.0);
    }

    #[test]
    fn labels_file_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "person\n\n  bicycle \ncar").unwrap();

        let table = ClassTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.name(1), "bicycle");
        assert_eq!(table.name(2), "car");
    }

    #[test]
    fn missing_labels_file_reports_path() {
        let err = ClassTable::from_file("/definitely/not/here.txt").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.txt"));
    }
}
