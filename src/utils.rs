use crate::consts::SAMPLE_RATE_HZ;

use base64::{engine, read, Engine};
use std::io::{Cursor, Read};

pub fn b64_decode_to_buf(enc: &str, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut cur = Cursor::new(enc.as_bytes());
    let mut decoder = read::DecoderReader::new(&mut cur, &engine::general_purpose::STANDARD);
    decoder.read_to_end(buf)
}

pub fn b64_encode(bytes: &[u8]) -> String {
    engine::general_purpose::STANDARD.encode(bytes)
}

/// PCM16 samples of a WAV file.  Chunks other than `fmt ` and `data` are skipped.
pub fn wav_to_pcm(wav: &[u8]) -> Result<Vec<i16>, hound::Error> {
    let reader = hound::WavReader::new(Cursor::new(wav))?;
    reader.into_samples::<i16>().collect()
}

/// Wrap mono PCM16 samples in a WAV container at `SAMPLE_RATE_HZ`.
pub fn pcm_to_wav(samples: &[i16]) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

pub fn le_bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// HTTP(S) base for the LiveKit server API, given the URL clients use for signalling.
pub fn livekit_http_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_keeps_samples() {
        let samples = vec![0, 1, -1, i16::MAX, i16::MIN];
        let wav = pcm_to_wav(&samples).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(wav_to_pcm(&wav).unwrap(), samples);
    }

    #[test]
    fn extra_chunks_before_data_are_skipped() {
        let samples: [i16; 3] = [7, -7, 300];
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(4u32 + 24 + 12 + 8 + 6).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
        wav.extend_from_slice(&(SAMPLE_RATE_HZ * 2).to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&4u32.to_le_bytes());
        wav.extend_from_slice(b"INFO");
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&6u32.to_le_bytes());
        wav.extend_from_slice(&pcm_to_le_bytes(&samples));

        assert_eq!(wav_to_pcm(&wav).unwrap(), samples);
    }

    #[test]
    fn truncated_wav_is_rejected() {
        assert!(wav_to_pcm(b"RIFF\x10\x00").is_err());
    }

    #[test]
    fn base64_decodes_into_buffer() {
        let mut buf = Vec::new();
        b64_decode_to_buf(&b64_encode(b"abc"), &mut buf).unwrap();
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn signalling_url_maps_to_https() {
        assert_eq!(
            livekit_http_base("wss://demo.livekit.cloud/"),
            "https://demo.livekit.cloud"
        );
        assert_eq!(livekit_http_base("ws://localhost:7880"), "http://localhost:7880");
        assert_eq!(
            livekit_http_base("https://demo.livekit.cloud"),
            "https://demo.livekit.cloud"
        );
    }
}
