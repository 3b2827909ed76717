// Handler signatures mirror Odoo's wide method surfaces.
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

pub mod config_api;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod odoo;
pub mod registry;
