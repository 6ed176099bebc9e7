use image::Rgb;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

const UNKNOWN_CLASS_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

/// Class names loaded once at startup, one name per line.
///
/// Colors are not stored: each class gets a deterministic hue from an
/// HSV wheel spread over the class count, so neighbouring class ids
/// stay visually distinct no matter how many classes the file holds.
#[derive(Debug)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);

        let mut names = Vec::new();
        for line_result in reader.lines() {
            let line = line_result?;
            let name = line.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }

        if names.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("No class names found in {:?}", filepath),
            ));
        }

        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn label(&self, class_id: usize) -> String {
        match self.names.get(class_id) {
            Some(name) => name.clone(),
            None => format!("class {}", class_id),
        }
    }

    pub fn color(&self, class_id: usize) -> Rgb<u8> {
        if class_id >= self.names.len() {
            return UNKNOWN_CLASS_COLOR;
        }
        let hue = class_id as f32 / self.names.len() as f32 * 360.;
        hsv_to_rgb(hue, 1., 1.)
    }
}

/// `h` in degrees `[0, 360)`, `s` and `v` in `[0, 1]`.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let h_prime = (h % 360.) / 60.;
    let x = c * (1. - (h_prime % 2. - 1.).abs());
    let m = v - c;

    let (r, g, b) = match h_prime as u32 {
        0 => (c, x, 0.),
        1 => (x, c, 0.),
        2 => (0., c, x),
        3 => (0., x, c),
        4 => (x, 0., c),
        _ => (c, 0., x),
    };

    Rgb([
        ((r + m) * 255.).round() as u8,
        ((g + m) * 255.).round() as u8,
        ((b + m) * 255.).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn coco_labels() -> ClassLabels {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/coco_labels.txt");
        ClassLabels::load(&path).unwrap()
    }

    #[test]
    fn loads_all_coco_classes() {
        let labels = coco_labels();
        assert_eq!(labels.len(), 80);
        assert_eq!(labels.label(0), "person");
        assert_eq!(labels.label(79), "toothbrush");
    }

    #[test]
    fn unknown_class_gets_placeholder_label_and_neutral_color() {
        let labels = coco_labels();
        assert_eq!(labels.label(200), "class 200");
        assert_eq!(labels.color(200), UNKNOWN_CLASS_COLOR);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ClassLabels::load(Path::new("/nonexistent/labels.txt")).is_err());
    }

    #[test]
    fn hue_wheel_endpoints() {
        assert_eq!(hsv_to_rgb(0., 1., 1.), Rgb([255, 0, 0]));
        assert_eq!(hsv_to_rgb(120., 1., 1.), Rgb([0, 255, 0]));
        assert_eq!(hsv_to_rgb(240., 1., 1.), Rgb([0, 0, 255]));
    }

    #[test]
    fn class_colors_are_deterministic_and_distinct() {
        let labels = coco_labels();
        assert_eq!(labels.color(3), labels.color(3));
        assert_ne!(labels.color(0), labels.color(40));
    }
}
