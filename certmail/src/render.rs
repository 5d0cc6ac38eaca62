//! Certificate rendering.
//!
//! The template image and the font are loaded and validated once per run;
//! each certificate is a clone of that canvas with two text overlays drawn
//! onto it. Text is anchored at the top-left corner of its position and
//! drawn in solid black, alpha-blended from the glyph coverage. Glyph
//! pixels falling outside the canvas are clipped, never an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{DynamicImage, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};

use crate::error::{CertmailError, Result};
use crate::roster::Recipient;

/// Name drawn on the sample certificate.
pub const PREVIEW_NAME: &str = "Pré-visualização";
/// Certificate number drawn on the sample certificate.
pub const PREVIEW_NUMBER: &str = "0000";

const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Top-left anchor of a text overlay, in pixels on the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl FromStr for Position {
    type Err = CertmailError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (x, y) = s.split_once(',').ok_or_else(|| {
            CertmailError::InvalidPosition(format!("expected X,Y pixels, got {s:?}"))
        })?;
        let x = x.trim().parse().map_err(|_| {
            CertmailError::InvalidPosition(format!("X is not a whole number in {s:?}"))
        })?;
        let y = y.trim().parse().map_err(|_| {
            CertmailError::InvalidPosition(format!("Y is not a whole number in {s:?}"))
        })?;
        Ok(Self { x, y })
    }
}

/// Everything the renderer needs to turn one recipient into one file.
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub template_path: PathBuf,
    pub font_path: PathBuf,
    /// Name overlay height in pixels.
    pub name_size: f32,
    /// Certificate number overlay height in pixels.
    pub number_size: f32,
    pub name_position: Position,
    pub number_position: Position,
    /// Output files are named `{base_name}_{recipient name}`.
    pub base_name: String,
    pub output_dir: PathBuf,
}

/// Renders certificates from one decoded template.
///
/// Construction front-loads every validation step so a bad template, font
/// or output directory fails the run before anything is emailed.
#[derive(Debug)]
pub struct Renderer {
    spec: RenderSpec,
    template: RgbaImage,
    font: Font<'static>,
    extension: String,
}

impl Renderer {
    pub fn new(spec: RenderSpec) -> Result<Self> {
        let template = image::open(&spec.template_path)
            .map_err(|e| {
                CertmailError::TemplateLoad(format!("{}: {e}", spec.template_path.display()))
            })?
            .to_rgba8();

        let font_bytes = fs::read(&spec.font_path)
            .map_err(|e| CertmailError::FontNotFound(format!("{}: {e}", spec.font_path.display())))?;
        let font = Font::try_from_vec(font_bytes).ok_or_else(|| {
            CertmailError::FontNotFound(format!(
                "{}: not a usable TrueType/OpenType font",
                spec.font_path.display()
            ))
        })?;

        fs::create_dir_all(&spec.output_dir)?;

        // Outputs keep the template's format.
        let extension = spec
            .template_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());

        Ok(Self {
            spec,
            template,
            font,
            extension,
        })
    }

    /// Where the certificate for `recipient_name` is written.
    pub fn output_path(&self, recipient_name: &str) -> PathBuf {
        self.spec.output_dir.join(output_file_name(
            &self.spec.base_name,
            recipient_name,
            &self.extension,
        ))
    }

    /// Render one certificate into the output directory and return its path.
    pub fn render(&self, recipient: &Recipient) -> Result<PathBuf> {
        let path = self.output_path(&recipient.name);
        self.render_to(recipient, &path)?;
        Ok(path)
    }

    /// Draw both overlays for one recipient and write the result to `path`,
    /// replacing any existing file.
    pub fn render_to(&self, recipient: &Recipient, path: &Path) -> Result<()> {
        let mut canvas = self.template.clone();
        draw_text(
            &mut canvas,
            &self.font,
            self.spec.name_size,
            self.spec.name_position,
            TEXT_COLOR,
            &recipient.name,
        );
        draw_text(
            &mut canvas,
            &self.font,
            self.spec.number_size,
            self.spec.number_position,
            TEXT_COLOR,
            &recipient.padded_number(),
        );
        save_canvas(canvas, path)
    }

    /// Render the sample certificate used to check the layout before a run.
    pub fn render_preview(&self, path: &Path) -> Result<()> {
        let sample = Recipient {
            row: 0,
            name: PREVIEW_NAME.to_string(),
            email: String::new(),
            certificate_number: PREVIEW_NUMBER.to_string(),
        };
        self.render_to(&sample, path)
    }
}

fn output_file_name(base_name: &str, recipient_name: &str, extension: &str) -> String {
    format!("{base_name}_{recipient_name}.{extension}")
}

/// JPEG cannot carry the alpha channel used while blending, so those
/// outputs are flattened to RGB first.
fn save_canvas(canvas: RgbaImage, path: &Path) -> Result<()> {
    let flatten = matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg") | Some("jpeg")
    );
    let saved = if flatten {
        DynamicImage::ImageRgba8(canvas).to_rgb8().save(path)
    } else {
        canvas.save(path)
    };
    saved.map_err(|e| match e {
        image::ImageError::IoError(io) => CertmailError::Io(io),
        other => CertmailError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
    })
}

/// Draw `text` onto `img` with its top-left corner at `pos`.
fn draw_text(
    img: &mut RgbaImage,
    font: &Font<'_>,
    pixel_height: f32,
    pos: Position,
    color: Rgba<u8>,
    text: &str,
) {
    let scale = Scale::uniform(pixel_height);
    let v_metrics = font.v_metrics(scale);
    // Glyphs sit on a baseline; shifting it down by the ascent makes `pos`
    // the top-left corner of the line box.
    let baseline = pos.y as f32 + v_metrics.ascent;
    let mut caret = pos.x as f32;

    for ch in text.chars() {
        let glyph = font.glyph(ch).scaled(scale).positioned(point(caret, baseline));
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                let x = gx as i32 + bb.min.x;
                let y = gy as i32 + bb.min.y;
                if x < 0 || y < 0 {
                    return;
                }
                let (x, y) = (x as u32, y as u32);
                if x >= img.width() || y >= img.height() {
                    return;
                }
                let alpha = coverage.clamp(0.0, 1.0);
                if alpha == 0.0 {
                    return;
                }
                let inverse = 1.0 - alpha;
                let pixel = img.get_pixel_mut(x, y);
                pixel.0[0] = (color.0[0] as f32 * alpha + pixel.0[0] as f32 * inverse) as u8;
                pixel.0[1] = (color.0[1] as f32 * alpha + pixel.0[1] as f32 * inverse) as u8;
                pixel.0[2] = (color.0[2] as f32 * alpha + pixel.0[2] as f32 * inverse) as u8;
                pixel.0[3] = 255;
            });
        }
        caret += glyph.unpositioned().h_metrics().advance_width;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn white_template(dir: &Path, file_name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(file_name);
        let canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        if file_name.ends_with(".jpg") {
            DynamicImage::ImageRgba8(canvas).to_rgb8().save(&path).unwrap();
        } else {
            canvas.save(&path).unwrap();
        }
        path
    }

    /// First parseable TrueType/OpenType font on this machine, if any.
    /// Overlay tests are skipped when the machine has no fonts installed.
    fn system_font() -> Option<PathBuf> {
        let roots = [
            "/usr/share/fonts",
            "/usr/local/share/fonts",
            "/Library/Fonts",
            "/System/Library/Fonts",
            "C:\\Windows\\Fonts",
        ];
        let mut candidates = Vec::new();
        for root in roots {
            collect_fonts(Path::new(root), &mut candidates);
        }
        candidates.into_iter().find(|path| {
            fs::read(path)
                .ok()
                .and_then(Font::try_from_vec)
                .is_some()
        })
    }

    fn collect_fonts(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_fonts(&path, out);
            } else if matches!(
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .as_deref(),
                Some("ttf") | Some("otf")
            ) {
                out.push(path);
            }
        }
    }

    fn spec(template: PathBuf, font: PathBuf, output_dir: PathBuf) -> RenderSpec {
        RenderSpec {
            template_path: template,
            font_path: font,
            name_size: 48.0,
            number_size: 32.0,
            name_position: Position { x: 20, y: 40 },
            number_position: Position { x: 200, y: 120 },
            base_name: "certificado".to_string(),
            output_dir,
        }
    }

    fn recipient(name: &str, number: &str) -> Recipient {
        Recipient {
            row: 1,
            name: name.to_string(),
            email: "ana@example.com".to_string(),
            certificate_number: number.to_string(),
        }
    }

    #[test]
    fn test_position_parses_x_comma_y() {
        assert_eq!("200,1340".parse::<Position>().unwrap(), Position { x: 200, y: 1340 });
        assert_eq!(" 10 , 20 ".parse::<Position>().unwrap(), Position { x: 10, y: 20 });
    }

    #[test]
    fn test_position_rejects_malformed_input() {
        for bad in ["200", "a,b", "1.5,2", "10,20,30", ""] {
            let err = bad.parse::<Position>().unwrap_err();
            assert!(matches!(err, CertmailError::InvalidPosition(_)), "{bad}");
        }
    }

    #[test]
    fn test_output_names_join_base_recipient_and_extension() {
        assert_eq!(
            output_file_name("certificado", "Ana Silva", "png"),
            "certificado_Ana Silva.png"
        );
        assert_eq!(output_file_name("cert", "Bruno", "jpg"), "cert_Bruno.jpg");
    }

    #[test]
    fn test_missing_template_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Renderer::new(spec(
            dir.path().join("missing.png"),
            dir.path().join("font.ttf"),
            dir.path().join("out"),
        ))
        .unwrap_err();
        assert!(matches!(err, CertmailError::TemplateLoad(_)));
    }

    #[test]
    fn test_missing_font_is_a_font_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 100, 100);
        let err = Renderer::new(spec(
            template,
            dir.path().join("missing.ttf"),
            dir.path().join("out"),
        ))
        .unwrap_err();
        assert!(matches!(err, CertmailError::FontNotFound(_)));
    }

    #[test]
    fn test_unparsable_font_is_a_font_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 100, 100);
        let font = dir.path().join("broken.ttf");
        fs::write(&font, b"not a font at all").unwrap();

        let err = Renderer::new(spec(template, font, dir.path().join("out"))).unwrap_err();
        assert!(matches!(err, CertmailError::FontNotFound(_)));
    }

    #[test]
    fn test_render_writes_a_changed_canvas_under_the_expected_name() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 400, 200);
        let out_dir = dir.path().join("out");

        let renderer = Renderer::new(spec(template, font, out_dir.clone())).unwrap();
        let path = renderer.render(&recipient("Ana Silva", "7")).unwrap();

        assert_eq!(path, out_dir.join("certificado_Ana Silva.png"));
        let rendered = image::open(&path).unwrap().to_rgba8();
        assert_eq!(rendered.dimensions(), (400, 200));

        let name_region_touched = rendered
            .enumerate_pixels()
            .any(|(_, y, p)| y < 100 && p.0[0] < 250);
        let number_region_touched = rendered
            .enumerate_pixels()
            .any(|(_, y, p)| y >= 110 && p.0[0] < 250);
        assert!(name_region_touched, "name overlay left no pixels");
        assert!(number_region_touched, "number overlay left no pixels");
    }

    #[test]
    fn test_rendering_twice_overwrites_the_file() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 400, 200);

        let renderer =
            Renderer::new(spec(template, font, dir.path().join("out"))).unwrap();
        let first = renderer.render(&recipient("Ana", "1")).unwrap();
        let second = renderer.render(&recipient("Ana", "1")).unwrap();

        assert_eq!(first, second);
        assert!(second.exists());
    }

    #[test]
    fn test_jpeg_templates_produce_flattened_jpeg_outputs() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.jpg", 300, 150);

        let renderer =
            Renderer::new(spec(template, font, dir.path().join("out"))).unwrap();
        let path = renderer.render(&recipient("Bruno", "2")).unwrap();

        assert!(path.to_string_lossy().ends_with("certificado_Bruno.jpg"));
        let rendered = image::open(&path).unwrap();
        assert_eq!(rendered.to_rgb8().dimensions(), (300, 150));
    }

    #[test]
    fn test_overlays_outside_the_canvas_are_clipped_not_fatal() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 200, 100);

        let mut render_spec = spec(template, font, dir.path().join("out"));
        // Well below the bottom edge.
        render_spec.number_position = Position { x: 50, y: 500 };

        let renderer = Renderer::new(render_spec).unwrap();
        let path = renderer.render(&recipient("Ana", "3")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_layout_places_both_overlays() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 1200, 2100);

        let render_spec = RenderSpec {
            template_path: template,
            font_path: font,
            name_size: 100.0,
            number_size: 60.0,
            name_position: Position { x: 200, y: 1340 },
            number_position: Position { x: 570, y: 1930 },
            base_name: "certificado".to_string(),
            output_dir: dir.path().join("out"),
        };
        let renderer = Renderer::new(render_spec).unwrap();

        let path = renderer
            .render(&recipient("Ana Silva", "42"))
            .unwrap();
        assert!(path.ends_with("certificado_Ana Silva.png"));

        let rendered = image::open(&path).unwrap().to_rgba8();
        let name_band = rendered
            .enumerate_pixels()
            .any(|(_, y, p)| (1340..1480).contains(&y) && p.0[0] < 250);
        let number_band = rendered
            .enumerate_pixels()
            .any(|(_, y, p)| (1930..2030).contains(&y) && p.0[0] < 250);
        let above_name = rendered
            .enumerate_pixels()
            .any(|(_, y, p)| y < 1300 && p.0[0] < 250);
        assert!(name_band, "no name overlay near y=1340");
        assert!(number_band, "no number overlay near y=1930");
        assert!(!above_name, "overlay bled above the name position");
    }

    #[test]
    fn test_preview_renders_the_sample_certificate() {
        let Some(font) = system_font() else {
            eprintln!("skipping: no system TTF/OTF font available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let template = white_template(dir.path(), "template.png", 400, 200);

        let renderer =
            Renderer::new(spec(template, font, dir.path().join("out"))).unwrap();
        let out = renderer.output_path(PREVIEW_NAME);
        renderer.render_preview(&out).unwrap();

        assert!(out.exists());
        let rendered = image::open(&out).unwrap().to_rgba8();
        assert!(rendered.pixels().any(|p| p.0[0] < 250));
    }
}
