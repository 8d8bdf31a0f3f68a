//! Frame annotation and JPEG encoding.
//!
//! Draws detection outlines and the density caption onto a captured frame,
//! then encodes it for the live raw-frame channel. Snapshots taken by the
//! notification sink are encoded without an overlay.

use anyhow::{anyhow, Result};
use detect_core::DetectionSet;
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageBuffer, Rgb, Rgba};
use video_ingest::Frame;

use crate::monitor::data::{FramePacket, Metrics};

const OUTLINE: Rgba<u8> = Rgba([0, 255, 0, 255]);
const CAPTION: Rgba<u8> = Rgba([0, 255, 0, 255]);
const ALERT: Rgba<u8> = Rgba([255, 64, 64, 255]);
const BACKDROP: Rgba<u8> = Rgba([0, 0, 0, 180]);

/// Render the detection overlay and density caption, then encode to JPEG.
pub(crate) fn annotate_frame(
    frame: &Frame,
    detections: &DetectionSet,
    metrics: &Metrics,
    frame_number: u64,
    fps: f32,
    jpeg_quality: i32,
) -> Result<FramePacket> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rgba = bgr_to_rgba(&frame.data);
    let mut image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_vec(width, height, rgba)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    for mask in detections {
        let left = mask.bbox[0].clamp(0.0, (width - 1) as f32);
        let top = mask.bbox[1].clamp(0.0, (height - 1) as f32);
        let right = mask.bbox[2].clamp(0.0, (width - 1) as f32);
        let bottom = mask.bbox[3].clamp(0.0, (height - 1) as f32);
        draw_rectangle(
            &mut image,
            left.round() as i32,
            top.round() as i32,
            right.round() as i32,
            bottom.round() as i32,
            OUTLINE,
        );
    }

    let captions = [
        format!("LARVAE {}", metrics.larvae_count),
        format!("PER CM2 {:.2}", metrics.density_per_cm2),
        format!("PER M2 {:.1}", metrics.density_per_m2),
    ];
    let mut caption_y = 8;
    for caption in &captions {
        paint_label(&mut image, 8, caption_y, caption, CAPTION);
        caption_y += 12;
    }
    if metrics.is_high_density {
        paint_label(&mut image, 8, caption_y, "HIGH DENSITY", ALERT);
    }

    let info = format!("FRAME {frame_number:06}  FPS {fps:4.1}");
    let info_width = (info.chars().count() as i32 * 6).min(width as i32);
    let info_x = (width as i32 - info_width - 4).max(0);
    let info_y = (height as i32 - 12).max(0);
    paint_label(&mut image, info_x, info_y, &info, Rgba([255, 255, 255, 255]));

    let jpeg = encode_jpeg(image, jpeg_quality)?;
    Ok(FramePacket {
        jpeg: actix_web::web::Bytes::from(jpeg),
        larvae_count: metrics.larvae_count,
        timestamp_ms: frame.timestamp_ms,
        frame_number,
        fps,
    })
}

/// Encode a bare frame for snapshot persistence (no overlay).
pub(crate) fn encode_snapshot(frame: &Frame, jpeg_quality: i32) -> Result<Vec<u8>> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_vec(width, height, bgr_to_rgba(&frame.data))
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;
    encode_jpeg(image, jpeg_quality)
}

fn encode_jpeg(image: ImageBuffer<Rgba<u8>, Vec<u8>>, jpeg_quality: i32) -> Result<Vec<u8>> {
    let rgb: ImageBuffer<Rgb<u8>, Vec<u8>> = DynamicImage::ImageRgba8(image).to_rgb8();
    let mut buffer = Vec::new();
    let quality = jpeg_quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Draw `text` over a darkened backdrop so captions stay readable.
fn paint_label(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    x: i32,
    y: i32,
    text: &str,
    color: Rgba<u8>,
) {
    let text_width = text.chars().count() as i32 * 6;
    fill_rect(image, x - 2, y - 1, x + text_width + 2, y + 8, BACKDROP);
    draw_label(image, x, y, text, color);
}

fn bgr_to_rgba(input: &[u8]) -> Vec<u8> {
    let pixels = input.len() / 3;
    let mut output = Vec::with_capacity(pixels * 4);
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
        output.push(255);
    }
    output
}

fn draw_rectangle(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgba<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgba<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgba<u8>,
) {
    let height = image.height() as i32;
    let baseline = y;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = baseline + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col as i32;
                        if px >= 0 && px < image.width() as i32 {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use detect_core::Mask;
    use video_ingest::{FrameSource, SyntheticSource};

    fn frame() -> Frame {
        SyntheticSource::endless((64, 48)).read().expect("frame")
    }

    fn metrics(high: bool) -> Metrics {
        Metrics {
            larvae_count: 2,
            density_per_cm2: if high { 1.5 } else { 0.005 },
            density_per_m2: if high { 15_000.0 } else { 48.4 },
            is_high_density: high,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn annotated_frame_encodes_to_jpeg() {
        let detections = vec![Mask {
            area_px: 400.0,
            bbox: [4.0, 4.0, 20.0, 16.0],
            confidence: 0.9,
        }];
        let packet =
            annotate_frame(&frame(), &detections, &metrics(false), 1, 29.7, 60).expect("annotate");
        assert_eq!(&packet.jpeg[..2], &[0xff, 0xd8]);
        assert_eq!(packet.larvae_count, 2);
        assert_eq!(packet.frame_number, 1);
    }

    #[test]
    fn high_density_overlay_still_encodes() {
        let packet =
            annotate_frame(&frame(), &Vec::new(), &metrics(true), 42, 10.0, 60).expect("annotate");
        assert_eq!(&packet.jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn snapshot_encoding_has_no_packet_wrapper() {
        let jpeg = encode_snapshot(&frame(), 60).expect("snapshot");
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
