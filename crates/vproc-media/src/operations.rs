//! Mapping from job options to FFmpeg commands.

use vproc_models::{
    ImageFormat, JobKind, OptimizeOptions, Quality, ThumbnailOptions, TranscodeOptions,
    VideoFormat,
};

use crate::command::FfmpegCommand;

/// Default audio bitrate for transcodes
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Kind-specific work for one job, minus the source bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Transcode(TranscodeOptions),
    Thumbnail(ThumbnailOptions),
    Optimize(OptimizeOptions),
}

impl Operation {
    pub fn kind(&self) -> JobKind {
        match self {
            Operation::Transcode(_) => JobKind::Transcode,
            Operation::Thumbnail(_) => JobKind::Thumbnail,
            Operation::Optimize(_) => JobKind::Optimize,
        }
    }

    /// Extension of the file the operation produces.
    pub fn output_extension(&self) -> &'static str {
        match self {
            Operation::Transcode(o) => o.format.extension(),
            Operation::Thumbnail(o) => o.format.extension(),
            Operation::Optimize(o) => o.format.extension(),
        }
    }

    /// Output size to report when the output cannot be probed.
    pub fn nominal_dimensions(&self) -> (u32, u32) {
        match self {
            Operation::Transcode(o) => o.resolution.dimensions(),
            Operation::Thumbnail(o) => (o.width, o.height.unwrap_or(0)),
            Operation::Optimize(o) => (o.max_width, o.max_height),
        }
    }

    /// Build the FFmpeg command reading `input` and writing `output`.
    pub fn build_command(&self, input: &str, output: &str) -> FfmpegCommand {
        match self {
            Operation::Transcode(o) => transcode_command(input, output, o),
            Operation::Thumbnail(o) => thumbnail_command(input, output, o),
            Operation::Optimize(o) => optimize_command(input, output, o),
        }
    }
}

/// VP9 `-cpu-used` for a quality tier; higher is faster.
fn vp9_cpu_used(quality: Quality) -> u8 {
    match quality {
        Quality::High => 1,
        Quality::Medium => 2,
        Quality::Low => 5,
    }
}

/// Re-encode video to the preset resolution, keeping the aspect ratio.
pub fn transcode_command(input: &str, output: &str, options: &TranscodeOptions) -> FfmpegCommand {
    let (_, height) = options.resolution.dimensions();
    let preset = options.quality.encode_preset();

    let cmd = FfmpegCommand::new(input, output)
        .video_filter(format!("scale=-2:{}", height))
        .video_codec(options.format.video_codec());

    let cmd = match options.format {
        VideoFormat::Mp4 => cmd
            .preset(preset.speed)
            .crf(preset.crf)
            .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"]),
        VideoFormat::Webm => cmd
            .crf(preset.crf)
            .output_args(["-b:v", "0", "-deadline", "good", "-cpu-used"])
            .output_arg(vp9_cpu_used(options.quality).to_string()),
    };

    cmd.audio_codec(options.format.audio_codec())
        .audio_bitrate(DEFAULT_AUDIO_BITRATE)
}

/// Grab one frame at the requested timestamp.
pub fn thumbnail_command(input: &str, output: &str, options: &ThumbnailOptions) -> FfmpegCommand {
    let height = match options.height {
        Some(h) => h.to_string(),
        None => "-2".to_string(),
    };

    let cmd = FfmpegCommand::new(input, output)
        .seek(options.timestamp_seconds.max(0.0))
        .single_frame()
        .video_filter(format!("scale={}:{}", options.width, height));

    with_image_quality(cmd, options.format, 90)
}

/// Shrink an image to fit the bounds (never upscale) and re-compress.
pub fn optimize_command(input: &str, output: &str, options: &OptimizeOptions) -> FfmpegCommand {
    let filter = format!(
        "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease",
        w = options.max_width,
        h = options.max_height
    );

    let cmd = FfmpegCommand::new(input, output)
        .single_frame()
        .video_filter(filter);

    with_image_quality(cmd, options.format, options.quality.min(100))
}

/// Map a 0-100 quality onto the encoder's own scale.
fn with_image_quality(cmd: FfmpegCommand, format: ImageFormat, quality: u8) -> FfmpegCommand {
    match format {
        // mjpeg -q:v runs 2 (best) .. 31 (worst)
        ImageFormat::Jpeg => {
            let q = 31 - (u32::from(quality) * 29 / 100);
            cmd.output_arg("-q:v").output_arg(q.to_string())
        }
        ImageFormat::Webp => cmd
            .video_codec("libwebp")
            .output_arg("-quality")
            .output_arg(quality.to_string()),
        // Lossless; quality only affects how hard we compress
        ImageFormat::Png => cmd
            .output_arg("-compression_level")
            .output_arg((u32::from(quality) * 9 / 100).to_string()),
    }
}
