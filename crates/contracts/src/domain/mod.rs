pub mod common;

pub mod a001_parcel;
pub mod a002_return_case;
