pub mod channels;
pub mod chunk_buffer;
pub mod level_meter;
pub mod mixer;
pub mod wav_format;
