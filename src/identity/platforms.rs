//! Static platform tables backing the identity assembler. Each
//! `PlatformRecord` groups the attributes that must co-occur for a
//! believable identity of that platform.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

pub struct PlatformRecord {
    pub name: &'static str,
    pub ua_token: &'static str,
    pub vendor: &'static str,
    pub default_timezone: &'static str,
    pub user_agents: &'static [&'static str],
    pub fonts: &'static [&'static str],
    pub plugins: &'static [&'static str],
    pub webgl: &'static [(&'static str, &'static str)],
    pub hw_concurrency: &'static [u32],
    pub device_memory: &'static [u32],
    pub screens: &'static [((u32, u32), (u32, u32))],
    pub tls_profile_ids: &'static [&'static str],
}

const WINDOWS: PlatformRecord = PlatformRecord {
    name: "windows",
    ua_token: "Windows NT",
    vendor: "Google Inc.",
    default_timezone: "America/New_York",
    user_agents: &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    ],
    fonts: &[
        "Arial", "Calibri", "Cambria", "Candara", "Consolas", "Constantia", "Corbel",
        "Georgia", "Segoe UI", "Tahoma", "Times New Roman", "Verdana",
    ],
    plugins: &["Chrome PDF Plugin", "Chrome PDF Viewer", "Native Client"],
    webgl: &[
        ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
        ("Google Inc. (Intel)", "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
        ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Series Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ],
    hw_concurrency: &[4, 8, 12, 16],
    device_memory: &[4, 8, 16],
    screens: &[
        ((1920, 1080), (1920, 1040)),
        ((2560, 1440), (2560, 1400)),
        ((1366, 768), (1366, 728)),
    ],
    tls_profile_ids: &["chrome-124-win", "chrome-123-win"],
};

const MACOS: PlatformRecord = PlatformRecord {
    name: "macos",
    ua_token: "Mac OS X",
    vendor: "Google Inc.",
    default_timezone: "America/Los_Angeles",
    user_agents: &[
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    ],
    fonts: &[
        "American Typewriter", "Avenir", "Helvetica Neue", "Menlo", "Monaco",
        "Optima", "San Francisco", "Futura", "Georgia",
    ],
    plugins: &["Chrome PDF Plugin", "Chrome PDF Viewer"],
    webgl: &[
        ("Google Inc. (Apple)", "ANGLE (Apple, Apple M1 Pro, OpenGL 4.1)"),
        ("Google Inc. (Apple)", "ANGLE (Apple, Apple M2, OpenGL 4.1)"),
        ("Intel Inc.", "Intel(R) Iris(TM) Plus Graphics OpenGL Engine"),
    ],
    hw_concurrency: &[8, 10, 12],
    device_memory: &[8, 16],
    screens: &[((2560, 1600), (2560, 1540)), ((1440, 900), (1440, 860))],
    tls_profile_ids: &["chrome-124-mac", "chrome-123-mac"],
};

const LINUX: PlatformRecord = PlatformRecord {
    name: "linux",
    ua_token: "X11; Linux",
    vendor: "Google Inc.",
    default_timezone: "Europe/Berlin",
    user_agents: &[
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    ],
    fonts: &["DejaVu Sans", "Liberation Sans", "Noto Sans", "Ubuntu", "Droid Sans"],
    plugins: &["Chrome PDF Plugin", "Chrome PDF Viewer"],
    webgl: &[
        ("Google Inc. (Intel)", "ANGLE (Intel, Mesa Intel(R) UHD Graphics 630 (CFL GT2), OpenGL 4.6)"),
        ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660/PCIe/SSE2, OpenGL 4.6)"),
    ],
    hw_concurrency: &[4, 8, 16],
    device_memory: &[4, 8],
    screens: &[((1920, 1080), (1920, 1053)), ((1600, 900), (1600, 873))],
    tls_profile_ids: &["chrome-124-linux"],
};

pub const ALL_PLATFORMS: &[PlatformRecord] = &[WINDOWS, MACOS, LINUX];

pub fn by_name(name: &str) -> Option<&'static PlatformRecord> {
    ALL_PLATFORMS.iter().find(|p| p.name == name)
}
