pub mod net;
pub mod qsir;
