use std::fs::File;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::decoder::{DecoderFactory, DecoderHandle};
use crate::error::SourceError;
use crate::models::{EncodedUnit, TrackFormat};

/// One track of an opened media resource
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub id: u32,
    pub codec_params: CodecParameters,
}

impl TrackDescriptor {
    pub fn new(id: u32, codec_params: CodecParameters) -> Self {
        Self { id, codec_params }
    }

    /// Sample rate, present only on audio tracks
    pub fn sample_rate(&self) -> Option<u32> {
        self.codec_params.sample_rate.filter(|rate| *rate > 0)
    }

    /// Channel count, defaulting to mono when the container does not say
    pub fn channel_count(&self) -> u16 {
        self.codec_params
            .channels
            .map(|channels| channels.count() as u16)
            .unwrap_or(1)
    }

    pub fn codec_name(&self) -> String {
        if self.codec_params.codec == CODEC_TYPE_NULL {
            return "unknown".to_string();
        }
        symphonia::default::get_codecs()
            .get_codec(self.codec_params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| format!("{}", self.codec_params.codec))
    }

    pub fn format(&self) -> Option<TrackFormat> {
        self.sample_rate()
            .map(|rate| TrackFormat::new(rate, self.channel_count(), self.codec_name()))
    }
}

/// Opens media resources for demuxing
pub trait MediaOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, SourceError>;
}

/// A demuxer over one opened resource.
///
/// `read_next` yields encoded units of the selected track in order, then exactly one
/// end-of-stream marker, then `SourceError::Exhausted`. `release` may be called any number
/// of times.
pub trait MediaSource {
    fn tracks(&self) -> Vec<TrackDescriptor>;

    fn select_track(&mut self, track_id: u32) -> Result<(), SourceError>;

    fn read_next(&mut self) -> Result<EncodedUnit, SourceError>;

    fn release(&mut self);
}

/// Choose the first audio track a decoder can be created for, and select it.
///
/// Tracks without a sample rate are skipped. So are tracks whose decoder cannot be created
/// or configured; the next candidate is tried.
pub fn select_audio_track(
    source: &mut dyn MediaSource,
    decoders: &dyn DecoderFactory,
) -> Result<(TrackFormat, DecoderHandle), SourceError> {
    let mut saw_audio = false;

    for track in source.tracks() {
        let Some(format) = track.format() else {
            debug!("Skipping track {} without a sample rate", track.id);
            continue;
        };
        saw_audio = true;
        debug!("Considering track {}: {}", track.id, format.format_description());

        let decoder = match decoders.create(&track) {
            Ok(session) => DecoderHandle::new(session),
            Err(e) => {
                warn!("Track {} has no usable decoder: {}", track.id, e);
                continue;
            }
        };

        source.select_track(track.id)?;
        info!("Selected track {} ({})", track.id, format.format_description());
        return Ok((format, decoder));
    }

    if saw_audio {
        Err(SourceError::NoDecoderAvailable)
    } else {
        Err(SourceError::NoAudioTrack)
    }
}

/// Owns an opened media source and releases it when dropped
pub struct SourceHandle {
    source: Box<dyn MediaSource>,
}

impl SourceHandle {
    pub fn open(opener: &dyn MediaOpener, path: &Path) -> Result<Self, SourceError> {
        let source = opener.open(path)?;
        debug!("Opened {}", path.display());
        Ok(Self { source })
    }
}

impl Deref for SourceHandle {
    type Target = dyn MediaSource;

    fn deref(&self) -> &Self::Target {
        self.source.as_ref()
    }
}

impl DerefMut for SourceHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.source.as_mut()
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.source.release();
    }
}

/// Opens local files through the symphonia probe
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaOpener;

impl SymphoniaOpener {
    pub fn new() -> Self {
        Self
    }
}

impl MediaOpener for SymphoniaOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, SourceError> {
        let reader = probe_file(path)?;
        Ok(Box::new(SymphoniaSource::new(path.to_path_buf(), reader)))
    }
}

fn probe_file(path: &Path) -> Result<Box<dyn FormatReader>, SourceError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound {
            path: path.display().to_string(),
        },
        _ => SourceError::ReadFailed(format!("{}: {}", path.display(), e)),
    })?;

    let media_source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SourceError::UnsupportedContainer(format!("{}: {}", path.display(), e)))?;

    Ok(probed.format)
}

/// Demuxer backed by a symphonia `FormatReader`
pub struct SymphoniaSource {
    path: PathBuf,
    reader: Option<Box<dyn FormatReader>>,
    selected: Option<u32>,
    finished: bool,
}

impl SymphoniaSource {
    pub fn new(path: PathBuf, reader: Box<dyn FormatReader>) -> Self {
        Self {
            path,
            reader: Some(reader),
            selected: None,
            finished: false,
        }
    }

    fn end_of_stream(&mut self, track_id: u32) -> EncodedUnit {
        self.finished = true;
        debug!("Reached end of {}", self.path.display());
        EncodedUnit::end_of_stream(track_id)
    }
}

impl MediaSource for SymphoniaSource {
    fn tracks(&self) -> Vec<TrackDescriptor> {
        self.reader
            .as_ref()
            .map(|reader| {
                reader
                    .tracks()
                    .iter()
                    .map(|track| TrackDescriptor::new(track.id, track.codec_params.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn select_track(&mut self, track_id: u32) -> Result<(), SourceError> {
        let reader = self.reader.as_ref().ok_or(SourceError::Released)?;
        if !reader.tracks().iter().any(|track| track.id == track_id) {
            return Err(SourceError::UnknownTrack(track_id));
        }
        self.selected = Some(track_id);
        Ok(())
    }

    fn read_next(&mut self) -> Result<EncodedUnit, SourceError> {
        let track_id = self
            .selected
            .ok_or_else(|| SourceError::ReadFailed("no track selected".to_string()))?;
        if self.finished {
            return Err(SourceError::Exhausted);
        }

        loop {
            let reader = self.reader.as_mut().ok_or(SourceError::Released)?;
            match reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != track_id {
                        continue;
                    }
                    let (timestamp, duration) = (packet.ts(), packet.dur());
                    return Ok(EncodedUnit::new(track_id, timestamp, duration, packet.data));
                }
                Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(self.end_of_stream(track_id));
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Stream of {} requires a reset; ending playback", self.path.display());
                    return Ok(self.end_of_stream(track_id));
                }
                Err(e) => {
                    return Err(SourceError::ReadFailed(format!("{}: {}", self.path.display(), e)));
                }
            }
        }
    }

    fn release(&mut self) {
        if self.reader.take().is_some() {
            debug!("Released {}", self.path.display());
        }
    }
}

/// Total playback length of the first audio track, when the container records it
pub fn probe_duration(path: &Path) -> Result<Option<Duration>, SourceError> {
    let reader = probe_file(path)?;

    let duration = reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .and_then(|track| {
            let frames = track.codec_params.n_frames?;
            let rate = track.codec_params.sample_rate.filter(|rate| *rate > 0)?;
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        });

    Ok(duration)
}

/// Formats of every audio track in the file
pub fn probe_tracks(path: &Path) -> Result<Vec<TrackFormat>, SourceError> {
    let mut source = SymphoniaOpener.open(path)?;
    let formats = source.tracks().iter().filter_map(TrackDescriptor::format).collect();
    source.release();
    Ok(formats)
}
