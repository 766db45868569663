use pest::error::Error;

pub mod nestml_parser;
pub use nestml_parser::NestmlParser;
pub use nestml_parser::Rule as NestmlRule;

use crate::ast::Model;

pub fn parse_nestml_string(text: &str) -> Result<Vec<Model>, Box<Error<NestmlRule>>> {
    nestml_parser::parse_string(text)
}
