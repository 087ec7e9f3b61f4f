pub mod mip_chain_app;
