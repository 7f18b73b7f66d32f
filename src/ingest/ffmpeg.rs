//! FFmpeg-backed decoding for files, network streams and capture devices.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::SourceSpec;

/// Open and read timeout for network inputs, in microseconds.
const NETWORK_TIMEOUT_US: &str = "5000000";

pub(crate) struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl FfmpegSource {
    pub(crate) fn open(spec: &SourceSpec) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = match spec {
            SourceSpec::File(path) => ffmpeg::format::input(path)
                .with_context(|| format!("failed to open '{}'", path.display()))?,
            SourceSpec::Network(url) => {
                let mut options = ffmpeg::Dictionary::new();
                options.set("rw_timeout", NETWORK_TIMEOUT_US);
                options.set("timeout", NETWORK_TIMEOUT_US);
                ffmpeg::format::input_with_dictionary(url, options)
                    .with_context(|| format!("failed to connect to '{}'", url))?
            }
            SourceSpec::Device(index) => open_device(*index)?,
            other => return Err(anyhow!("ffmpeg cannot open {}", other.label())),
        };

        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
        })
    }

    /// Decode the next frame, draining the decoder after the last packet so
    /// no buffered frame is lost.
    pub(crate) fn next_image(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let wanted = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == wanted)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let row_bytes = (width as usize) * 3;
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data(0);

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame does not fit {}x{}", width, height))
    }
}

#[cfg(target_os = "linux")]
fn open_device(index: u32) -> Result<ffmpeg::format::context::Input> {
    ffmpeg::device::register_all();
    let path = format!("/dev/video{}", index);
    let format = ffmpeg::device::input::video()
        .find(|format| format.name().contains("v4l2"))
        .ok_or_else(|| anyhow!("ffmpeg was built without video4linux2 support"))?;
    match ffmpeg::format::open_with(&path, &format, ffmpeg::Dictionary::new())
        .with_context(|| format!("failed to open capture device {}", path))?
    {
        ffmpeg::format::context::Context::Input(input) => Ok(input),
        ffmpeg::format::context::Context::Output(_) => {
            Err(anyhow!("{} opened as an output", path))
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_device(index: u32) -> Result<ffmpeg::format::context::Input> {
    Err(anyhow!("capture device {} is only supported on Linux", index))
}
