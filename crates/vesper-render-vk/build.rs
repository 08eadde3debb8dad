use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader: a triangle from gl_VertexIndex, rotated and aspect-corrected
    // by push constants. Layout must match `PulsePush` in pipeline.rs.
    let vs_src = r#"
#version 450
layout(push_constant) uniform Pulse {
    vec4 tint;
    float angle;
    float aspect;
} pc;

layout(location = 0) out vec3 vColor;

const vec2 POS[3] = vec2[](vec2(0.0, -0.6), vec2(0.55, 0.4), vec2(-0.55, 0.4));
const vec3 COL[3] = vec3[](vec3(1.0, 0.2, 0.2), vec3(0.2, 1.0, 0.2), vec3(0.2, 0.2, 1.0));

void main() {
    vec2 p = POS[gl_VertexIndex];
    float c = cos(pc.angle);
    float s = sin(pc.angle);
    p = vec2(c * p.x - s * p.y, s * p.x + c * p.y);
    p.x /= max(pc.aspect, 0.0001);
    vColor = COL[gl_VertexIndex] * pc.tint.rgb;
    gl_Position = vec4(p, 0.0, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "pulse.vert",
            "main",
            Some(&opts),
        )
        .unwrap();
    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "pulse.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("pulse.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("pulse.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
