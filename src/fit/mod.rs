pub mod adjoint;
pub mod train;
