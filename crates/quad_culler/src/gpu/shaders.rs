/// Workgroup size placeholder, substituted by [`cull_shader_source`].
const WORKGROUP_SIZE_PLACEHOLDER: &str = "__WORKGROUP_SIZE__";

pub const CULL_WGSL: &str = r#"
struct CullParams {
  view_proj: mat4x4<f32>,
  quad_count: u32,
  cull_mode: u32,
  _pad0: vec2<u32>,
};

struct DrawIndexedIndirectArgs {
  index_count: atomic<u32>,
  instance_count: u32,
  first_index: u32,
  base_vertex: i32,
  first_instance: u32,
};

@group(0) @binding(0) var<storage, read> in_indices: array<u32>;
@group(0) @binding(1) var<storage, read_write> out_indices: array<u32>;
@group(0) @binding(2) var<storage, read> positions: array<f32>;
@group(0) @binding(3) var<storage, read_write> draw_args: DrawIndexedIndirectArgs;
@group(0) @binding(4) var<uniform> params: CullParams;

const CULL_MODE_REFERENCE: u32 = 0u;
const INDICES_PER_QUAD: u32 = 6u;

fn unpack_first(packed: u32) -> u32 {
  return packed >> 16u;
}

fn unpack_second(packed: u32) -> u32 {
  return packed & 0xffffu;
}

fn gather_position(index: u32) -> vec3<f32> {
  let base = index * 3u;
  return vec3<f32>(positions[base], positions[base + 1u], positions[base + 2u]);
}

fn is_culled(p0: vec3<f32>, p1: vec3<f32>, p2: vec3<f32>) -> bool {
  if (params.cull_mode == CULL_MODE_REFERENCE) {
    return p0.x > 0.0;
  }
  let c0 = params.view_proj * vec4<f32>(p0, 1.0);
  let c1 = params.view_proj * vec4<f32>(p1, 1.0);
  let c2 = params.view_proj * vec4<f32>(p2, 1.0);
  let lo = min(min(c0.xy, c1.xy), c2.xy);
  let hi = max(max(c0.xy, c1.xy), c2.xy);
  return hi.x < 0.0 || hi.y < 0.0 || lo.x > 0.0 || lo.y > 0.0;
}

@compute @workgroup_size(1)
fn reset_args() {
  atomicStore(&draw_args.index_count, 0u);
  draw_args.instance_count = 1u;
  draw_args.first_index = 0u;
  draw_args.base_vertex = 0;
  draw_args.first_instance = 0u;
}

@compute @workgroup_size(__WORKGROUP_SIZE__)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let quad_id = gid.x;
  if (quad_id >= params.quad_count) {
    return;
  }

  let base = quad_id * 3u;
  let packed0 = in_indices[base];
  let packed1 = in_indices[base + 1u];
  let packed2 = in_indices[base + 2u];

  let p0 = gather_position(unpack_first(packed0));
  let p1 = gather_position(unpack_second(packed0));
  let p2 = gather_position(unpack_first(packed1));
  if (is_culled(p0, p1, p2)) {
    return;
  }

  let reserved = atomicAdd(&draw_args.index_count, INDICES_PER_QUAD);
  let slot = reserved / 2u;
  out_indices[slot] = packed0;
  out_indices[slot + 1u] = packed1;
  out_indices[slot + 2u] = packed2;
}
"#;

/// Culling shader with the workgroup size written in as a literal.
pub fn cull_shader_source(workgroup_size: u32) -> String {
    CULL_WGSL.replace(WORKGROUP_SIZE_PLACEHOLDER, &format!("{workgroup_size}u"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_size_is_a_literal() {
        let source = cull_shader_source(128);
        assert!(source.contains("@compute @workgroup_size(128u)"));
        assert!(source.contains("@compute @workgroup_size(1)"));
        assert!(!source.contains(WORKGROUP_SIZE_PLACEHOLDER));
        assert!(!source.contains("override"));
    }
}
