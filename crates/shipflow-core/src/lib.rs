//! ShipFlow Core
//!
//! イメージ定義のデータモデル、イメージ名のパース、
//! プロジェクトファイル (shipflow.yaml) の読み込みを提供します。

pub mod error;
pub mod loader;
pub mod model;
pub mod name;

pub use error::{CoreError, Result};
pub use loader::{Project, load_project_file, parse_project};
pub use model::*;
pub use name::ImageName;
