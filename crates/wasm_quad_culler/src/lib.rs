//! WASM bindings for quad culling.
//!
//! Exposes the CPU kernel, the WebGPU kernel and the index packing helpers
//! to JavaScript.

use js_sys::{Float32Array, Object, Reflect, Uint32Array};
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use quad_culler::core::{CullMode, CullOpts, CullOutput, CullParams, QuadBatch};
use quad_culler::gpu::{GpuQuadCuller, GpuQuadCullerConfig};
use quad_culler::reference_cpu::cull_quads_cpu;

thread_local! {
    static LOG_ENABLED: std::cell::Cell<bool> = std::cell::Cell::new(true);
}

fn log(message: &str) {
    if LOG_ENABLED.with(|enabled| enabled.get()) {
        web_sys::console::log_1(&message.into());
    }
}

#[wasm_bindgen]
pub fn init_logging() {
    console_error_panic_hook::set_once();
}

#[wasm_bindgen]
pub fn set_log_enabled(enabled: bool) {
    LOG_ENABLED.with(|flag| flag.set(enabled));
    log(&format!(
        "[wasm_quad_culler] logging {}",
        if enabled { "on" } else { "off" }
    ));
}

fn parse_view_proj(view_proj: &[f32]) -> Result<glam::Mat4, String> {
    let cols: &[f32; 16] = view_proj
        .try_into()
        .map_err(|_| format!("view_proj must have 16 elements (got {})", view_proj.len()))?;
    Ok(glam::Mat4::from_cols_array(cols))
}

fn cull_mode(screen_bounds: bool) -> CullMode {
    if screen_bounds {
        CullMode::ScreenBounds
    } else {
        CullMode::Reference
    }
}

/// Draw arguments as five `u32` words, in the layout `drawIndexedIndirect` reads.
fn draw_args_words(output: &CullOutput) -> Vec<u32> {
    output
        .draw_args
        .as_bytes()
        .chunks_exact(4)
        .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
        .collect()
}

fn cull_cpu(
    packed_indices: &[u32],
    positions: &[f32],
    view_proj: &[f32],
    screen_bounds: bool,
) -> Result<CullOutput, String> {
    let view_proj = parse_view_proj(view_proj)?;
    let batch = QuadBatch::new(packed_indices.to_vec(), positions.to_vec());
    let params = CullParams::for_batch(&batch, view_proj);
    let opts = CullOpts {
        mode: cull_mode(screen_bounds),
        ..CullOpts::default()
    };
    cull_quads_cpu(&batch, &params, &opts).map_err(|e| e.to_string())
}

/// Culling result returned to JavaScript.
#[wasm_bindgen]
pub struct CullResult {
    packed_indices: Vec<u32>,
    draw_args: Vec<u32>,
    visible_quads: u32,
    culled_quads: u32,
}

impl From<CullOutput> for CullResult {
    fn from(output: CullOutput) -> Self {
        Self {
            draw_args: draw_args_words(&output),
            visible_quads: output.stats.visible_quads,
            culled_quads: output.stats.culled_quads,
            packed_indices: output.packed_indices,
        }
    }
}

#[wasm_bindgen]
impl CullResult {
    /// Packed index entries of the surviving quads (three per quad).
    #[wasm_bindgen(getter)]
    pub fn packed_indices(&self) -> Vec<u32> {
        self.packed_indices.clone()
    }

    /// Indexed-indirect draw arguments (five words).
    #[wasm_bindgen(getter)]
    pub fn draw_args(&self) -> Vec<u32> {
        self.draw_args.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn index_count(&self) -> u32 {
        self.draw_args.first().copied().unwrap_or(0)
    }

    #[wasm_bindgen(getter)]
    pub fn visible_quads(&self) -> u32 {
        self.visible_quads
    }

    #[wasm_bindgen(getter)]
    pub fn culled_quads(&self) -> u32 {
        self.culled_quads
    }
}

/// Pack a flat 16-bit index list (six per quad) into packed entries.
#[wasm_bindgen]
pub fn pack_index_list(indices: &[u16]) -> Result<Vec<u32>, JsValue> {
    quad_culler::pack_index_list(indices).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Expand packed entries into a flat 16-bit index list.
#[wasm_bindgen]
pub fn unpack_index_list(packed: &[u32]) -> Vec<u16> {
    quad_culler::unpack_index_list(packed)
}

/// Cull on the CPU. `view_proj` is a column-major 4x4 matrix.
#[wasm_bindgen]
pub fn cull_quads(
    packed_indices: &[u32],
    positions: &[f32],
    view_proj: &[f32],
    screen_bounds: bool,
) -> Result<CullResult, JsValue> {
    let output = cull_cpu(packed_indices, positions, view_proj, screen_bounds)
        .map_err(|e| JsValue::from_str(&e))?;
    log(&format!(
        "[wasm_quad_culler] cpu visible={} culled={}",
        output.stats.visible_quads, output.stats.culled_quads
    ));
    Ok(output.into())
}

#[wasm_bindgen]
pub struct WasmQuadCuller {
    inner: Rc<GpuQuadCuller>,
}

#[wasm_bindgen]
impl WasmQuadCuller {
    #[wasm_bindgen]
    pub fn new() -> js_sys::Promise {
        future_to_promise(async {
            log("[wasm_quad_culler] init");
            let culler = GpuQuadCuller::new(GpuQuadCullerConfig::default())
                .await
                .map_err(|err| JsValue::from_str(&err.to_string()))?;
            let limits = culler.limits_summary();
            log(&format!(
                "[wasm_quad_culler] limits invocations={} storage_bytes={} workgroups_dim={}",
                limits.max_invocations_per_workgroup,
                limits.max_storage_buffer_binding_size,
                limits.max_compute_workgroups_per_dimension
            ));
            Ok(JsValue::from(WasmQuadCuller {
                inner: Rc::new(culler),
            }))
        })
    }

    /// Cull on the GPU. Resolves to `{ packed_indices, draw_args, index_count,
    /// visible_quads, culled_quads }`.
    #[wasm_bindgen]
    pub fn cull(
        &self,
        packed_indices: Uint32Array,
        positions: Float32Array,
        view_proj: Float32Array,
        screen_bounds: bool,
    ) -> js_sys::Promise {
        let packed_indices = packed_indices.to_vec();
        let positions = positions.to_vec();
        let view_proj = view_proj.to_vec();
        let inner = self.inner.clone();
        future_to_promise(async move {
            log("[wasm_quad_culler] cull");
            let view_proj = parse_view_proj(&view_proj).map_err(|e| JsValue::from_str(&e))?;
            let batch = QuadBatch::new(packed_indices, positions);
            let params = CullParams::for_batch(&batch, view_proj);
            let output = inner
                .cull(&batch, &params, cull_mode(screen_bounds))
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;

            let object = Object::new();
            let packed = Uint32Array::from(output.packed_indices.as_slice());
            Reflect::set(&object, &JsValue::from_str("packed_indices"), &packed).ok();
            let draw_args = Uint32Array::from(draw_args_words(&output).as_slice());
            Reflect::set(&object, &JsValue::from_str("draw_args"), &draw_args).ok();
            Reflect::set(
                &object,
                &JsValue::from_str("index_count"),
                &JsValue::from(output.draw_args.index_count),
            )
            .ok();
            Reflect::set(
                &object,
                &JsValue::from_str("visible_quads"),
                &JsValue::from(output.stats.visible_quads),
            )
            .ok();
            Reflect::set(
                &object,
                &JsValue::from_str("culled_quads"),
                &JsValue::from(output.stats.culled_quads),
            )
            .ok();

            Ok(JsValue::from(object))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    #[test]
    fn view_proj_requires_sixteen_floats() {
        assert!(parse_view_proj(&IDENTITY).is_ok());
        assert!(parse_view_proj(&IDENTITY[..12]).is_err());
    }

    #[test]
    fn cpu_cull_reports_draw_words() {
        let positions = [
            -0.5, -0.5, 0.0, //
            0.5, -0.5, 0.0, //
            -0.5, 0.5, 0.0, //
            0.5, 0.5, 0.0,
        ];
        let packed = quad_culler::pack_index_list(&[0, 1, 2, 2, 1, 3]).expect("pack");
        let output = cull_cpu(&packed, &positions, &IDENTITY, true).expect("cull");
        let result = CullResult::from(output);
        assert_eq!(result.draw_args, vec![6, 1, 0, 0, 0]);
        assert_eq!(result.index_count(), 6);
        assert_eq!(result.packed_indices, packed);
    }

    #[test]
    fn cpu_cull_surfaces_bad_indices() {
        let packed = quad_culler::pack_index_list(&[0, 1, 2, 2, 1, 3]).expect("pack");
        let err = cull_cpu(&packed, &[0.0; 6], &IDENTITY, true).unwrap_err();
        assert!(err.contains("vertex"), "{err}");
    }
}
