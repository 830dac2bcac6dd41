//! Export formats available for a set of solids.

use crate::state::{DesignState, IoState, Solid, SolidKind};

const FORMATS_3D: [&str; 6] = ["stla", "stlb", "amf", "x3d", "obj", "json"];
const FORMATS_2D: [&str; 3] = ["dxf", "svg", "json"];

/// Decides which export formats apply to the latest geometry.
pub trait ExportCatalog: Send + Sync {
    /// Formats usable for `solids`, preferred format first.
    fn formats_for(&self, solids: &[Solid]) -> Vec<String>;

    /// File extension written for `format`.
    fn extension_for(&self, format: &str) -> String;

    /// Build the `io` substate for a design whose solids were just replaced.
    fn io_for(&self, design: &DesignState) -> IoState {
        let available_export_formats = self.formats_for(&design.solids);
        let export_format = available_export_formats.first().cloned();
        let export_file_path = export_format.as_deref().map(|format| {
            format!(
                "{}/{}.{}",
                design.path.trim_end_matches('/'),
                design.name,
                self.extension_for(format)
            )
        });
        IoState {
            export_format,
            export_file_path,
            available_export_formats,
        }
    }
}

/// 3D formats when any solid is 3D, 2D formats when all are 2D.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExportCatalog;

impl ExportCatalog for DefaultExportCatalog {
    fn formats_for(&self, solids: &[Solid]) -> Vec<String> {
        let formats: &[&str] = if solids.iter().any(|s| s.kind == SolidKind::Solid3D) {
            &FORMATS_3D
        } else if solids.is_empty() {
            &[]
        } else {
            &FORMATS_2D
        };
        formats.iter().map(|f| (*f).to_string()).collect()
    }

    fn extension_for(&self, format: &str) -> String {
        match format {
            "stla" | "stlb" => "stl".to_string(),
            other => other.to_string(),
        }
    }
}
