mod legacy;
mod streaming;
