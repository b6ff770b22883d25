pub mod highlight;
pub mod rank;
pub mod tokens;

pub use highlight::highlights;
pub use rank::{Ranker, SearchSettings, TokenDistance};
pub use tokens::TokenList;
