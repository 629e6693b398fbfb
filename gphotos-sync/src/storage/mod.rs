mod token_file;

pub use token_file::{TokenFile, TokenFileError, TokenState};
