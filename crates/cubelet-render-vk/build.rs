use std::{env, fs, path::PathBuf};

// Vertex layout (binding 0, interleaved, 32-byte stride):
//   location 0: R32G32B32_SFLOAT position
//   location 1: R32G32B32_SFLOAT normal
//   location 2: R32G32_SFLOAT    texture coordinate
const VERTEX_SRC: &str = r#"
#version 450
layout(location = 0) in vec3 inPosition;
layout(location = 1) in vec3 inNormal;
layout(location = 2) in vec2 inTexCoord;

layout(set = 0, binding = 0) uniform Scene {
    mat4 viewProj;
    mat4 world;
    mat4 worldInverseTranspose;
    vec4 viewerPosition;
} scene;

layout(push_constant) uniform PerModel {
    mat4 model;
    uint useTexture;
    vec4 color;
} pc;

layout(location = 0) out vec3 vWorldPos;
layout(location = 1) out vec3 vNormal;
layout(location = 2) out vec2 vTexCoord;

void main() {
    vec4 world = scene.world * pc.model * vec4(inPosition, 1.0);
    mat3 normalMat = mat3(scene.worldInverseTranspose) * transpose(inverse(mat3(pc.model)));
    vWorldPos = world.xyz;
    vNormal = normalMat * inNormal;
    vTexCoord = inTexCoord;
    gl_Position = scene.viewProj * world;
}
"#;

// Blinn-Phong over up to three point, spot or directional lights.
const FRAGMENT_SRC: &str = r#"
#version 450
layout(location = 0) in vec3 vWorldPos;
layout(location = 1) in vec3 vNormal;
layout(location = 2) in vec2 vTexCoord;

layout(set = 0, binding = 0) uniform Scene {
    mat4 viewProj;
    mat4 world;
    mat4 worldInverseTranspose;
    vec4 viewerPosition;
} scene;

layout(set = 0, binding = 1) uniform Light {
    vec4 position[3];
    vec4 direction[3];
    vec4 color[3];
    uvec4 isOn;
    uvec4 isDirectional;
    float shininess;
    float cutoff;
    vec4 ambient;
    vec4 specularColor;
} light;

layout(set = 1, binding = 0) uniform sampler2D tex;

layout(push_constant) uniform PerModel {
    mat4 model;
    uint useTexture;
    vec4 color;
} pc;

layout(location = 0) out vec4 outColor;

void main() {
    vec4 base = pc.color;
    if (pc.useTexture != 0u) {
        base.rgb *= texture(tex, vTexCoord).rgb;
    }

    vec3 n = normalize(vNormal);
    vec3 toViewer = normalize(scene.viewerPosition.xyz - vWorldPos);
    vec3 lit = light.ambient.rgb * base.rgb;

    for (int i = 0; i < 3; ++i) {
        if (light.isOn[i] == 0u) {
            continue;
        }
        vec3 toLight;
        if (light.isDirectional[i] != 0u) {
            toLight = normalize(-light.direction[i].xyz);
        } else {
            toLight = normalize(light.position[i].xyz - vWorldPos);
            if (light.cutoff > 0.0 && dot(-toLight, light.direction[i].xyz) < light.cutoff) {
                continue;
            }
        }
        float diffuse = max(dot(n, toLight), 0.0);
        vec3 halfway = normalize(toLight + toViewer);
        float spec = diffuse > 0.0 ? pow(max(dot(n, halfway), 0.0), light.shininess) : 0.0;
        lit += light.color[i].rgb * (diffuse * base.rgb + spec * light.specularColor.rgb);
    }

    outColor = vec4(lit, base.a);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (VERTEX_SRC, shaderc::ShaderKind::Vertex, "mesh.vert"),
        (FRAGMENT_SRC, shaderc::ShaderKind::Fragment, "mesh.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    // Sources are inline above
    println!("cargo:rerun-if-changed=build.rs");
}
