pub mod pcap;
pub mod riff;
pub mod video;
