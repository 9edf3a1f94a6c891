pub(crate) mod helpers;
mod unit;
